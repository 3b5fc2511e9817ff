pub mod service;

pub use service::{
    forget_batch, get_batch_session, poll_batch_events, start_batch, BatchRequest,
    BatchSessionSnapshot, BatchSessionStatus,
};
