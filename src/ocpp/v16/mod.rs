//! OCPP 1.6-J request/response builders (`outgoing`) and incoming-call
//! handling (`incoming`), per spec.md §4.2.

pub mod incoming;
pub mod outgoing;
