#![warn(missing_docs)] // <= 合适时移除它.

//! CIFTI dense 数据的索引与存储. 支持 dconn / dtseries / dscalar 等 dense 文件.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 只处理 dense 类型的映射 (brain models, series, scalars), 不处理
//!   parcels 与 labels.
//! 2. 数据一律以 `f32` 对外提供. 读取 FLOAT64 文件时会转换精度.
//! 3. 一个 [`DenseFile`] 只能在一个线程中使用. 并行读取请打开多个实例.
//!
//! # 开发计划
//!
//! ### brainordinate 映射 ✅
//!
//! (结构, 顶点) / (结构, 体素) 与线性索引之间的双向查询.
//!
//! 实现位于 `cifti-dense/src/brain_models`.
//!
//! ### CIFTI XML 读写 ✅
//!
//! 1. CIFTI-2 读写. ✅
//! 2. CIFTI-1 读写 (前两维互换, 体积空间位于 `Matrix` 下). ✅
//! 3. series / scalars 映射与文件级元数据. ✅
//!
//! 实现位于 `cifti-dense/src/xml`.
//!
//! ### NIfTI 容器 ✅
//!
//! 读取 NIfTI-1 / NIfTI-2 header (两种字节序), 写出 NIfTI-2.
//!
//! 实现位于 `cifti-dense/src/nifti_io`.
//!
//! ### 存储后端 ✅
//!
//! 内存, 磁盘与远程 (HTTP) 三种后端, 行为一致.
//!
//! 实现位于 `cifti-dense/src/storage`.
//!
//! ### dense 文件 ✅
//!
//! 惰性创建写后端, 后端迁移, 原地改写 (先读入内存再重写).
//!
//! 实现位于 `cifti-dense/src/dense`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 体素索引 `[i, j, k]`. 有符号, 便于表示非法 (负) 输入.
pub type Ijk = [i64; 3];

pub mod consts;

mod error;
pub use error::{CiftiError, CiftiResult};

pub mod config;

mod structure;
pub use structure::Structure;

mod volume;
pub use volume::VolumeSpace;

pub mod brain_models;
pub use brain_models::BrainModelIndex;

pub mod xml;
pub use xml::{CiftiVersion, CiftiXml, IndexMap};

/// NIfTI 文件读写.
mod nifti_io;
pub use nifti_io::Endian;

pub mod storage;
pub use storage::{BackendKind, RowStorage, StorageBackend};

mod dense;
pub use dense::DenseFile;

pub mod prelude;
