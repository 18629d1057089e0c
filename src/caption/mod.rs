//! Background image captioning.
//!
//! Frames flow from the stream assembler into a capacity-1 hand-off slot;
//! a single worker thread drains it, runs the caption model and publishes
//! the text on a board that request handlers read without waiting.

pub mod backends;
pub mod beam;
pub mod board;
pub mod model;
pub mod preprocess;
pub mod slot;
pub mod vocab;
pub mod worker;

pub use beam::{beam_search, BeamConfig, TokenScorer};
pub use board::{CaptionBoard, CaptionSnapshot};
pub use model::CaptionModel;
pub use slot::{HandoffSlot, Offer};
pub use vocab::Vocabulary;
pub use worker::{CaptionWorker, DEFAULT_POLL_INTERVAL};
