pub mod batch_client;
pub mod openai_batch;
pub mod simulated;

pub use batch_client::{BatchAdapter, PollStatus};
pub use openai_batch::OpenAiBatchClient;
pub use simulated::SimulatedBatchClient;
