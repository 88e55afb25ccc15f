//! Generated gRPC bindings for the beacon backend transport.
//!
//! The relay only ever acts as a client of these services; the server side
//! is generated too so the integration tests can stand up mock backends.

/// The `beacon.v1.Public` service: beacons, chain info and id listing.
pub mod beacon {
    include!(concat!(env!("OUT_DIR"), "/beacon.v1.rs"));
}

/// The standard `grpc.health.v1.Health` service.
pub mod health {
    include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.rs"));
}
