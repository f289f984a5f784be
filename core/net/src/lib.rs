//! Network layer: transport abstraction, HTTP client, connectivity monitor.

pub mod http;
pub mod monitor;
pub mod transport;

pub use http::HttpTransport;
pub use monitor::{
    CellularGeneration, ConnectivityConfig, ConnectivityEvent, ConnectivityMonitor,
    ConnectivityState, LinkSnapshot, TransportType,
};
pub use transport::{Transport, TransportRequest, TransportResponse};
