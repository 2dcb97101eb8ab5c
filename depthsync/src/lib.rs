//! depthsync：多台深度相机的独占打开、同步拓扑校验与并行启停
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use depthsync::prelude::*;
//! use depthsync::simulation::SimulatedHub;
//!
//! # fn main() -> depthsync::Result<()> {
//! let registry = DeviceRegistry::new(Arc::new(SimulatedHub::master_subordinate_pair()));
//! let session = registry.open(0)?;
//! let config = DeviceConfiguration::disable_all()
//!     .color(ImageFormat::ColorMjpg, ColorResolution::R1080p)
//!     .depth(DepthMode::NfovBinned)
//!     .wired_sync(WiredSyncMode::Master);
//! session.start_cameras(&config)?;
//! let capture = session.get_next_capture(Duration::from_secs(1))?;
//! capture.release();
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub(crate) mod internal;
pub mod registry;
pub mod session;

pub use depthsync_core::{builder, error, frame, pipeline, pixel_format, telemetry, time, topology, traits, validate};
pub use depthsync_core::error::{CameraError, ConfigurationError, Result};

#[cfg(feature = "simulation")]
pub use depthsync_simulation as simulation;

pub use coordinator::{start_parallel, stop_and_close_parallel, ParallelOutcome, ParallelReport, StartRequest};
pub use registry::{DeviceRegistry, OwnershipToken};
pub use session::{CameraState, DeviceSession, ImuState};

/// 预置模块，用户可以通过 `use depthsync::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::coordinator::{start_parallel, stop_and_close_parallel, ParallelOutcome, StartRequest};
    pub use crate::registry::DeviceRegistry;
    pub use crate::session::{CameraState, DeviceSession, ImuState};
    pub use depthsync_core::prelude::*;
}
