//! In-process doubles for the external capabilities, shared by unit and
//! integration tests.

pub mod mocks;
