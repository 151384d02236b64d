//! Outbound HTTP with retry, circuit breaking and connectivity probes.

mod client;

pub use client::{
    ConnectivityReport, EndpointCheck, EndpointStatus, HttpResponse, NETWORK_BREAKER, NetworkClient,
    NetworkConfig, NetworkStats,
};
