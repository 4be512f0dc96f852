//! Backend selection module.
//!
//! This module defines the available computation backends for the engine
//! and provides functions to set and get the current backend.
//!
//! # Supported Backends
//!
//! - `Cpu`: general-purpose scalar CPU backend (default).
//! - `Simd`: vectorized CPU backend; uses AVX2 paths when built with the
//!   `simd` feature on capable hardware, scalar paths otherwise.
//! - `Wgpu`: GPU compute backend using `wgpu` (behind the `wgpu` feature).
//!
//! The default backend is stored globally using an `AtomicU8`, enabling
//! fast switching between backends at runtime. It can also be pinned
//! through the `CORTEN_BACKEND` environment variable, which is handy when
//! comparing backends on a target device without rebuilding.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};
use std::str::FromStr;

use crate::error::EngineError;

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// General-purpose CPU backend (default).
    #[default]
    Cpu = 0,
    /// SIMD-vectorized CPU backend.
    Simd,
    /// GPU compute backend using `wgpu`.
    Wgpu,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Simd),
            2 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

impl FromStr for Backend {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Backend::Cpu),
            "simd" | "neon" | "avx2" => Ok(Backend::Simd),
            "wgpu" | "gpu" => Ok(Backend::Wgpu),
            _ => Err(EngineError::BackendUnavailable("unrecognized backend name")),
        }
    }
}

impl Backend {
    /// Short name used in diagnostics and tuning keys.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Simd => "simd",
            Backend::Wgpu => "wgpu",
        }
    }

    /// Whether this backend can execute on the current host.
    ///
    /// The CPU backends always can (the SIMD backend carries a scalar
    /// fallback path). The GPU backend requires the `wgpu` feature and a
    /// usable adapter.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Cpu | Backend::Simd => true,
            Backend::Wgpu => {
                #[cfg(feature = "wgpu")]
                {
                    crate::runtime::WgpuRuntime::global().is_some()
                }
                #[cfg(not(feature = "wgpu"))]
                {
                    false
                }
            }
        }
    }
}

/// Internal global state for the active backend. Acquire/release ordering
/// keeps reads consistent across the worker threads the CPU backends
/// spawn.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the active backend used for operator execution.
///
/// # Example
///
/// ```
/// use corten::backend::{set_backend, Backend};
/// set_backend(Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active computation backend.
///
/// On first call, a `CORTEN_BACKEND` environment override is applied if
/// present. If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    static ENV_OVERRIDE: std::sync::Once = std::sync::Once::new();
    ENV_OVERRIDE.call_once(|| {
        if let Some(pinned) = backend_from_env() {
            tracing::info!(backend = pinned.name(), "backend pinned by environment");
            set_backend(pinned);
        }
    });
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

/// Resolves the backend pinned by the `CORTEN_BACKEND` environment
/// variable, if any. An unset or unparsable value yields `None`; callers
/// decide whether that is worth a diagnostic.
pub fn backend_from_env() -> Option<Backend> {
    std::env::var("CORTEN_BACKEND").ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_round_trips_through_u8() {
        for b in [Backend::Cpu, Backend::Simd, Backend::Wgpu] {
            assert_eq!(Backend::try_from(b as u8), Ok(b));
        }
        assert_eq!(Backend::try_from(200u8), Err(()));
    }

    #[test]
    fn backend_parses_from_names() {
        assert_eq!("cpu".parse::<Backend>().unwrap(), Backend::Cpu);
        assert_eq!("SIMD".parse::<Backend>().unwrap(), Backend::Simd);
        assert_eq!("gpu".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert!("npu".parse::<Backend>().is_err());
    }
}
