//! Synthetic meter-value generation, per spec.md §4.1 "Meter value
//! synthesis".
//!
//! Meter values are synthesized, not measured (spec.md §1 Non-goals:
//! "Real electrical-engineering accuracy"). `rust_ocpp::v1_6::types` is
//! the wire vocabulary we build `MeterValuesRequest.meter_value` entries
//! from.

use chrono::Utc;
use rand::Rng;
use rust_ocpp::v1_6::types::{Measurand, MeterValue, Phase, SampledValue, UnitOfMeasure};

use crate::domain::template::CurrentOutType;

/// Random fluctuation of `base` by up to `pct` percent, per spec.md §4.1
/// `fluctuate(base, pct)`.
pub fn fluctuate(base: f64, pct: f64) -> f64 {
    if pct <= 0.0 {
        return base;
    }
    let mut rng = rand::thread_rng();
    let delta = base * (pct / 100.0);
    let offset = rng.gen_range(-delta..=delta);
    (base + offset).max(0.0)
}

/// Parameters controlling one synthesized sample.
pub struct MeterSampleSpec {
    pub current_out_type: CurrentOutType,
    pub number_of_phases: u8,
    pub voltage_out: f64,
    pub connector_capacity_w: f64,
    pub cumulative_energy_wh: f64,
    pub power_w: f64,
    pub soc: Option<u8>,
    pub fluctuation_pct: f64,
    pub include_voltage: bool,
    pub include_power: bool,
    pub include_current: bool,
    pub include_l_l_voltages: bool,
    pub custom_value_limitation: bool,
    pub transaction_context: bool,
}

fn clamp_to_capacity(value: f64, capacity_w: f64, limit: bool) -> f64 {
    if limit && capacity_w > 0.0 {
        value.min(capacity_w)
    } else {
        value
    }
}

fn energy_sample(wh: f64, context: &'static str) -> SampledValue {
    SampledValue {
        value: format!("{:.0}", wh.max(0.0)),
        context: Some(parse_context(context)),
        format: None,
        measurand: Some(Measurand::EnergyActiveImportRegister),
        phase: None,
        location: None,
        unit: Some(UnitOfMeasure::Wh),
    }
}

fn parse_context(s: &str) -> rust_ocpp::v1_6::types::ReadingContext {
    use rust_ocpp::v1_6::types::ReadingContext::*;
    match s {
        "Transaction.Begin" => TransactionBegin,
        "Transaction.End" => TransactionEnd,
        "Sample.Clock" => SampleClock,
        _ => SamplePeriodic,
    }
}

/// Build the `Transaction.Begin` / `Transaction.End` boundary meter value
/// (spec.md §4.1: "build `transactionBeginMeterValue`").
pub fn transaction_boundary_meter_value(cumulative_energy_wh: f64, begin: bool) -> MeterValue {
    MeterValue {
        timestamp: Utc::now(),
        sampled_value: vec![energy_sample(
            cumulative_energy_wh,
            if begin { "Transaction.Begin" } else { "Transaction.End" },
        )],
    }
}

/// Build one periodic `MeterValues` sample set.
///
/// AC 3-phase expands into per-phase samples (L1, L2, L3, plus optional
/// L1-L2 etc.); DC collapses to a single `allPhases` value, per spec.md
/// §4.1.
pub fn periodic_meter_value(spec: &MeterSampleSpec) -> MeterValue {
    let energy = fluctuate(spec.cumulative_energy_wh, spec.fluctuation_pct);
    let mut samples = vec![energy_sample(energy, "Sample.Periodic")];

    let power = clamp_to_capacity(
        fluctuate(spec.power_w, spec.fluctuation_pct),
        spec.connector_capacity_w,
        spec.custom_value_limitation,
    );

    match spec.current_out_type {
        CurrentOutType::Dc => {
            if spec.include_voltage {
                samples.push(SampledValue {
                    value: format!("{:.1}", fluctuate(spec.voltage_out, spec.fluctuation_pct)),
                    context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
                    format: None,
                    measurand: Some(Measurand::Voltage),
                    phase: None,
                    location: None,
                    unit: Some(UnitOfMeasure::V),
                });
            }
            if spec.include_current {
                let current = if spec.voltage_out > 0.0 { power / spec.voltage_out } else { 0.0 };
                samples.push(SampledValue {
                    value: format!("{:.2}", current),
                    context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
                    format: None,
                    measurand: Some(Measurand::CurrentImport),
                    phase: None,
                    location: None,
                    unit: Some(UnitOfMeasure::A),
                });
            }
        }
        CurrentOutType::Ac => {
            if spec.include_voltage {
                // The phase-less "line" sample, in addition to the
                // per-phase L-N set, per spec.md §4.1: voltage count is
                // `1 (line) + 3 (L-N) [+ 3 (L-L) if enabled]`.
                samples.push(SampledValue {
                    value: format!("{:.1}", fluctuate(spec.voltage_out, spec.fluctuation_pct)),
                    context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
                    format: None,
                    measurand: Some(Measurand::Voltage),
                    phase: None,
                    location: None,
                    unit: Some(UnitOfMeasure::V),
                });

                let phases: &[Phase] = match spec.number_of_phases {
                    3 => &[Phase::L1N, Phase::L2N, Phase::L3N],
                    _ => &[Phase::L1N],
                };
                for &phase in phases {
                    samples.push(SampledValue {
                        value: format!("{:.1}", fluctuate(spec.voltage_out, spec.fluctuation_pct)),
                        context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
                        format: None,
                        measurand: Some(Measurand::Voltage),
                        phase: Some(phase),
                        location: None,
                        unit: Some(UnitOfMeasure::V),
                    });
                }
                if spec.include_l_l_voltages && spec.number_of_phases == 3 {
                    for &phase in &[Phase::L1L2, Phase::L2L3, Phase::L3L1] {
                        samples.push(SampledValue {
                            value: format!("{:.1}", fluctuate(spec.voltage_out * 1.732, spec.fluctuation_pct)),
                            context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
                            format: None,
                            measurand: Some(Measurand::Voltage),
                            phase: Some(phase),
                            location: None,
                            unit: Some(UnitOfMeasure::V),
                        });
                    }
                }
            }
        }
    }

    if spec.include_power {
        samples.push(SampledValue {
            value: format!("{:.0}", power),
            context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
            format: None,
            measurand: Some(Measurand::PowerActiveImport),
            phase: None,
            location: None,
            unit: Some(UnitOfMeasure::W),
        });
    }

    if let Some(soc) = spec.soc {
        samples.push(SampledValue {
            value: soc.to_string(),
            context: Some(rust_ocpp::v1_6::types::ReadingContext::SamplePeriodic),
            format: None,
            measurand: Some(Measurand::SoC),
            phase: None,
            location: None,
            unit: Some(UnitOfMeasure::Percent),
        });
    }
    let _ = spec.transaction_context;

    MeterValue {
        timestamp: Utc::now(),
        sampled_value: samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec(current_out_type: CurrentOutType, phases: u8) -> MeterSampleSpec {
        MeterSampleSpec {
            current_out_type,
            number_of_phases: phases,
            voltage_out: 230.0,
            connector_capacity_w: 22000.0,
            cumulative_energy_wh: 1000.0,
            power_w: 7000.0,
            soc: None,
            fluctuation_pct: 0.0,
            include_voltage: true,
            include_power: true,
            include_current: true,
            include_l_l_voltages: true,
            custom_value_limitation: false,
            transaction_context: true,
        }
    }

    #[test]
    fn ac_three_phase_voltage_sample_count() {
        let spec = base_spec(CurrentOutType::Ac, 3);
        let mv = periodic_meter_value(&spec);
        let voltages = mv
            .sampled_value
            .iter()
            .filter(|s| s.measurand == Some(Measurand::Voltage))
            .count();
        // 1 (line) + 3 (L-N) + 3 (L-L) = 7
        assert_eq!(voltages, 7);
    }

    #[test]
    fn dc_yields_single_voltage_and_current() {
        let spec = base_spec(CurrentOutType::Dc, 1);
        let mv = periodic_meter_value(&spec);
        let voltages = mv.sampled_value.iter().filter(|s| s.measurand == Some(Measurand::Voltage)).count();
        let currents = mv
            .sampled_value
            .iter()
            .filter(|s| s.measurand == Some(Measurand::CurrentImport))
            .count();
        assert_eq!(voltages, 1);
        assert_eq!(currents, 1);
    }

    #[test]
    fn energy_always_present() {
        let spec = base_spec(CurrentOutType::Ac, 1);
        let mv = periodic_meter_value(&spec);
        assert!(mv
            .sampled_value
            .iter()
            .any(|s| s.measurand == Some(Measurand::EnergyActiveImportRegister)));
    }

    #[test]
    fn custom_limitation_clamps_power() {
        let mut spec = base_spec(CurrentOutType::Ac, 1);
        spec.power_w = 50_000.0;
        spec.custom_value_limitation = true;
        spec.connector_capacity_w = 7_000.0;
        let mv = periodic_meter_value(&spec);
        let power_sample = mv
            .sampled_value
            .iter()
            .find(|s| s.measurand == Some(Measurand::PowerActiveImport))
            .unwrap();
        let value: f64 = power_sample.value.parse().unwrap();
        assert!(value <= 7_000.0);
    }
}
