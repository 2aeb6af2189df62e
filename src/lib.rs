#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

pub mod algebra;
pub mod config;
pub mod error;
pub mod net;
pub mod paillier;
pub mod protocols;

pub use error::TripleError;
pub use protocols::{
    generate_triple,
    triplets::{ActiveParty, PartyContext, PassiveParty, TripleShare},
};
