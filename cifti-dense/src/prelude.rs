//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{CiftiError, CiftiResult, Ijk};

pub use crate::brain_models::{BrainModel, BrainModelIndex, IndexInfo, ModelKind};
pub use crate::structure::Structure;
pub use crate::volume::VolumeSpace;

pub use crate::xml::{CiftiVersion, CiftiXml, IndexMap, MetaData, ScalarsMap, SeriesMap, SeriesUnit};

pub use crate::config::{ByteOrderPref, CiftiConfig, RemoteConfig};
pub use crate::nifti_io::Endian;

pub use crate::storage::{BackendKind, InMemoryStorage, OnDiskStorage, RowStorage, StorageBackend};

#[cfg(feature = "remote")]
pub use crate::storage::RemoteStorage;

pub use crate::dense::DenseFile;
