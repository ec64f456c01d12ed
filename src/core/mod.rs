pub mod auth_gate;
pub mod dispatcher;
pub mod forwarding;

pub use auth_gate::{AuthError, AuthGate};
pub use dispatcher::{DispatchError, Dispatcher, RegisteredRoute};
pub use forwarding::{ForwardingAdapter, UpstreamTarget};
