mod queue_name;
mod region;

pub use queue_name::QueueName;
pub use region::Region;
