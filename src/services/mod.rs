mod background;
mod clock;
mod lifecycle;
mod network;

pub use background::ServiceController;
pub use clock::{Clock, SystemClock};
pub use lifecycle::{ClosedEvent, LifecycleMonitor, SingleEvent, Transition};
pub use network::{AlwaysOnline, NetworkProbe, TcpProbe};

#[cfg(test)]
pub use clock::ManualClock;
