//! 通用常量.

/// NIfTI header 扩展中, CIFTI XML 所使用的保留扩展码.
pub const NIFTI_ECODE_CIFTI: i32 = 32;

/// NIfTI `datatype`: 32 位浮点.
pub const NIFTI_TYPE_FLOAT32: i16 = 16;

/// NIfTI `datatype`: 64 位浮点.
pub const NIFTI_TYPE_FLOAT64: i16 = 64;

/// CIFTI 矩阵维度之前 NIfTI header 中保留的空间/时间维度个数.
/// 这些维度必须全部为 1.
pub const CIFTI_RESERVED_DIMS: usize = 4;

/// XML 中的模型类型字符串.
pub mod model_type {
    /// 表面模型.
    pub const SURFACE: &str = "CIFTI_MODEL_TYPE_SURFACE";

    /// 体素模型.
    pub const VOXELS: &str = "CIFTI_MODEL_TYPE_VOXELS";
}

/// XML 中的索引映射类型字符串.
pub mod index_type {
    /// brainordinate 映射.
    pub const BRAIN_MODELS: &str = "CIFTI_INDEX_TYPE_BRAIN_MODELS";

    /// 序列映射 (CIFTI-2).
    pub const SERIES: &str = "CIFTI_INDEX_TYPE_SERIES";

    /// 时间点映射 (CIFTI-1 中序列映射的旧名).
    pub const TIME_POINTS: &str = "CIFTI_INDEX_TYPE_TIME_POINTS";

    /// 标量映射.
    pub const SCALARS: &str = "CIFTI_INDEX_TYPE_SCALARS";
}

/// NIfTI intent code 与 intent name.
pub mod intent {
    /// 未知 CIFTI 类型.
    pub const CONNECTIVITY_UNKNOWN: i32 = 3000;

    /// dconn.
    pub const CONNECTIVITY_DENSE: i32 = 3001;

    /// dtseries.
    pub const CONNECTIVITY_DENSE_SERIES: i32 = 3002;

    /// dscalar.
    pub const CONNECTIVITY_DENSE_SCALARS: i32 = 3006;

    /// 与 [`CONNECTIVITY_UNKNOWN`] 对应.
    pub const NAME_UNKNOWN: &str = "ConnUnknown";

    /// 与 [`CONNECTIVITY_DENSE`] 对应.
    pub const NAME_DENSE: &str = "ConnDense";

    /// 与 [`CONNECTIVITY_DENSE_SERIES`] 对应 (CIFTI-2).
    pub const NAME_DENSE_SERIES: &str = "ConnDenseSeries";

    /// 与 [`CONNECTIVITY_DENSE_SERIES`] 对应 (CIFTI-1).
    pub const NAME_DENSE_TIME: &str = "ConnDenseTime";

    /// 与 [`CONNECTIVITY_DENSE_SCALARS`] 对应.
    pub const NAME_DENSE_SCALAR: &str = "ConnDenseScalar";
}
