mod dispatcher;
mod sink;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher, Priority};
pub use sink::{InboxSink, LogSink, NotificationSink};

#[cfg(test)]
pub use sink::MemorySink;
