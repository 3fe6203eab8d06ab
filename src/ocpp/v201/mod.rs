//! OCPP 2.0.1 request/response builders (`outgoing`) and incoming-call
//! handling (`incoming`), per spec.md §4.2's "2.0 covered" subset.

pub mod incoming;
pub mod outgoing;
