/// Role and board identity for supported node types.
///
/// Each role module defines the identity the node announces on the mesh
/// and over BLE, selected at compile time via feature flags.

#[cfg(feature = "role-hub")]
mod role {
    pub const ROLE_NAME: &str = "hub";
    pub const DEVICE_NAME: &str = "WaveMesh-Hub";
    pub const DEVICE_KIND: &str = "audio_hub";
    pub const IS_COORDINATOR: bool = true;
}

#[cfg(feature = "role-relay")]
mod role {
    pub const ROLE_NAME: &str = "relay";
    pub const DEVICE_NAME: &str = "WaveMesh-Relay";
    pub const DEVICE_KIND: &str = "audio_relay";
    pub const IS_COORDINATOR: bool = false;
}

#[cfg(not(any(feature = "role-hub", feature = "role-relay")))]
mod role {
    pub const ROLE_NAME: &str = "unknown";
    pub const DEVICE_NAME: &str = "WaveMesh";
    pub const DEVICE_KIND: &str = "unknown";
    pub const IS_COORDINATOR: bool = false;
}

pub use role::*;
