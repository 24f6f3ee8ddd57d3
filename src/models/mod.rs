pub mod loaders;
pub mod pair_queue;
pub mod records;
pub mod source;
pub mod work_item;

pub use loaders::{load_municipalities, load_questions};
pub use pair_queue::{PairQueue, QueueCounts};
pub use records::{BatchHandle, ErrorRecord, PairRequest, ResultRecord};
pub use source::{Municipality, Question, SourceCatalog};
pub use work_item::{Outcome, WorkItem, WorkItemKey, WorkStatus};
