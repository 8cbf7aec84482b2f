//! Outreach email sequencer.

pub mod sequencer;

pub use sequencer::{OutreachSequencer, SendOutcome, SequencerReport};
