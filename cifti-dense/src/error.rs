//! 运行时错误.
//!
//! 所有错误都直接传递给调用方, 内部不做任何重试.

use std::path::PathBuf;

use crate::structure::Structure;
use crate::Ijk;

/// 本 crate 的统一错误类型.
///
/// 变体大致分为四组: 结构错误 (brainordinate 映射本身不合法), 格式错误
/// (XML / NIfTI header 不合规), 维度错误 (调用形式与矩阵阶数不符), 资源错误
/// (文件, 内存, 网络).
#[derive(Debug, thiserror::Error)]
pub enum CiftiError {
    // ---------------------------------------------------------------- 结构错误
    /// 同一结构已经存在同类模型.
    #[error("结构 {0} 已存在同类模型")]
    DuplicateStructure(Structure),

    /// 模型的顶点或体素列表为空.
    #[error("结构 {0} 的模型为空")]
    EmptyModel(Structure),

    /// 顶点越界或重复. 第三个字段为表面顶点总数.
    #[error("结构 {structure} 的顶点 {vertex} 非法 (表面顶点数 {vertex_count})")]
    InvalidVertex {
        /// 所属结构.
        structure: Structure,
        /// 出错的顶点.
        vertex: i64,
        /// 表面顶点总数.
        vertex_count: i64,
    },

    /// 数组长度不符合要求.
    #[error("数组长度 {found} 非法: {reason}")]
    BadLength {
        /// 实际长度.
        found: usize,
        /// 期望的长度 (或约束).
        reason: String,
    },

    /// 体素坐标为负或超出体积空间.
    #[error("结构 {structure} 的体素 {ijk:?} 非法")]
    InvalidVoxel {
        /// 所属结构.
        structure: Structure,
        /// 出错的体素.
        ijk: Ijk,
    },

    /// 体素已属于其他模型.
    #[error("体素 {0:?} 被重复使用")]
    VoxelReuse(Ijk),

    /// 新体积空间无法容纳已有体素.
    #[error("已有体素 {0:?} 不在新的体积空间内")]
    SpaceMismatch(Ijk),

    /// XML 中 brain model 的 IndexOffset 相互重叠.
    #[error("第 {model} 个 brain model 的 IndexOffset {offset} 与前一个模型重叠")]
    Overlap {
        /// 出错的 offset.
        offset: usize,
        /// 排序后的模型序号.
        model: usize,
    },

    /// XML 中 brain model 的 IndexOffset 之间存在空隙.
    #[error("第 {model} 个 brain model 的 IndexOffset {offset} 之前存在空隙")]
    Gap {
        /// 出错的 offset.
        offset: usize,
        /// 排序后的模型序号.
        model: usize,
    },

    /// 存在体素模型但没有体积空间.
    #[error("体素模型缺少体积空间")]
    MissingVolumeSpace,

    // ---------------------------------------------------------------- 格式错误
    /// 底层 XML 解析/写出错误.
    #[error("XML 错误: {0}")]
    Xml(#[from] quick_xml::Error),

    /// CIFTI XML 内容不合规.
    #[error("CIFTI XML 解析失败: {0}")]
    Parse(String),

    /// 结构名不在固定结构表中.
    #[error("未知结构名 `{0}`")]
    UnknownStructure(String),

    /// NIfTI header 与 XML 描述的维度不一致.
    #[error("{path:?}: 维度不一致: {reason}")]
    DimensionMismatch {
        /// 文件路径.
        path: PathBuf,
        /// 详情.
        reason: String,
    },

    /// NIfTI 文件中找不到 CIFTI 扩展.
    #[error("{0:?}: 找不到 CIFTI 扩展")]
    NoExtension(PathBuf),

    /// NIfTI header 不合规.
    #[error("{path:?}: NIfTI header 非法: {reason}")]
    BadHeader {
        /// 文件路径.
        path: PathBuf,
        /// 详情.
        reason: String,
    },

    /// NIfTI-1 header 读取错误.
    #[error("NIfTI-1 header 读取失败: {0}")]
    Nifti(#[from] nifti::NiftiError),

    // ---------------------------------------------------------------- 维度错误
    /// 单索引便捷接口只适用于二维矩阵.
    #[error("该操作要求 {expected} 维矩阵, 实际为 {found} 维")]
    WrongRank {
        /// 期望的维度数.
        expected: usize,
        /// 实际维度数.
        found: usize,
    },

    /// 新映射没有任何维度.
    #[error("映射没有任何维度")]
    EmptyMapping,

    /// 某一维的长度尚未确定 (CIFTI-1 时间序列在读取 NIfTI header 之前).
    #[error("第 {0} 维的长度尚未确定")]
    UnresolvedLength(usize),

    /// 在设置映射之前访问数据.
    #[error("在设置 CIFTI XML 之前访问了数据")]
    UninitializedAccess,

    /// 行/列索引越界.
    #[error("索引 {index} 越界 (长度 {len})")]
    IndexOutOfRange {
        /// 索引.
        index: usize,
        /// 可用长度.
        len: usize,
    },

    /// 后端只读.
    #[error("后端只读")]
    ReadOnly,

    // ---------------------------------------------------------------- 资源错误
    /// 带路径的 I/O 错误.
    #[error("{path:?}: {source}")]
    FileIo {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 内存分配失败. 字段为请求的字节数.
    #[error("无法分配 {0} 字节的内存")]
    Allocation(u64),

    /// HTTP 请求失败.
    #[cfg(feature = "remote")]
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 响应状态码非成功.
    #[error("请求 {url} 失败, 状态码 {status}")]
    HttpStatus {
        /// 请求的 URL.
        url: String,
        /// 状态码.
        status: u16,
    },

    /// 远程响应内容不合规.
    #[error("远程响应非法: {0}")]
    BadReply(String),

    /// 配置文件解析错误.
    #[cfg(feature = "serde")]
    #[error("配置文件解析失败: {0}")]
    Config(#[from] toml::de::Error),
}

/// 本 crate 的统一结果类型.
pub type CiftiResult<T> = Result<T, CiftiError>;

impl CiftiError {
    /// 构造 [`CiftiError::Parse`].
    #[inline]
    pub(crate) fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// 构造 [`CiftiError::BadLength`].
    #[inline]
    pub(crate) fn bad_length<S: Into<String>>(found: usize, reason: S) -> Self {
        Self::BadLength {
            found,
            reason: reason.into(),
        }
    }

    /// 为 I/O 错误附加路径.
    #[inline]
    pub(crate) fn file_io<P: Into<PathBuf>>(path: P) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::FileIo { path, source }
    }
}
