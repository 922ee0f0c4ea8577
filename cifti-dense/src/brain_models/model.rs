use std::ops::Range;

use crate::structure::Structure;
use crate::Ijk;

/// 反向查找表中 "未映射" 的哨兵值.
pub(crate) const UNMAPPED: usize = usize::MAX;

/// 模型类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModelKind {
    /// 表面顶点模型.
    Surface,

    /// 体素模型.
    Voxels,
}

/// 表面模型: 某结构表面上被使用的顶点, 按线性索引顺序排列.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceModel {
    pub(crate) structure: Structure,
    pub(crate) vertex_count: usize,
    pub(crate) vertices: Vec<usize>,
    /// 顶点 -> 线性索引. 长度为 `vertex_count`, 未使用的顶点为 [`UNMAPPED`].
    pub(crate) lookup: Vec<usize>,
    pub(crate) start: usize,
}

impl SurfaceModel {
    /// 所属结构.
    #[inline]
    pub fn structure(&self) -> Structure {
        self.structure
    }

    /// 表面的顶点总数.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// 被使用的顶点, 按线性索引顺序排列.
    #[inline]
    pub fn vertices(&self) -> &[usize] {
        &self.vertices
    }

    /// 获取顶点对应的线性索引.
    #[inline]
    pub fn index_for_vertex(&self, vertex: usize) -> Option<usize> {
        self.lookup.get(vertex).copied().filter(|&i| i != UNMAPPED)
    }
}

/// 体素模型: 某结构包含的体素, 按线性索引顺序排列.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelModel {
    pub(crate) structure: Structure,
    pub(crate) voxels: Vec<Ijk>,
    pub(crate) start: usize,
}

impl VoxelModel {
    /// 所属结构.
    #[inline]
    pub fn structure(&self) -> Structure {
        self.structure
    }

    /// 体素列表.
    #[inline]
    pub fn voxels(&self) -> &[Ijk] {
        &self.voxels
    }
}

/// 单个 brain model.
#[derive(Debug, Clone, PartialEq)]
pub enum BrainModel {
    /// 表面模型.
    Surface(SurfaceModel),

    /// 体素模型.
    Voxels(VoxelModel),
}

impl BrainModel {
    /// 所属结构.
    #[inline]
    pub fn structure(&self) -> Structure {
        match self {
            Self::Surface(m) => m.structure,
            Self::Voxels(m) => m.structure,
        }
    }

    /// 模型类型.
    #[inline]
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Surface(_) => ModelKind::Surface,
            Self::Voxels(_) => ModelKind::Voxels,
        }
    }

    /// 模型包含的 brainordinate 个数.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Surface(m) => m.vertices.len(),
            Self::Voxels(m) => m.voxels.len(),
        }
    }

    /// 模型是否为空. 已提交的模型总是非空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 起始线性索引.
    #[inline]
    pub fn start(&self) -> usize {
        match self {
            Self::Surface(m) => m.start,
            Self::Voxels(m) => m.start,
        }
    }

    /// 结束线性索引 (不含).
    #[inline]
    pub fn end(&self) -> usize {
        self.start() + self.len()
    }

    /// 线性索引范围 `[start, end)`.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start()..self.end()
    }

    /// 获取 `index` 处的 brainordinate. `index` 必须位于 [`Self::range`] 内.
    pub(crate) fn info_at(&self, index: usize) -> IndexInfo {
        let offset = index - self.start();
        match self {
            Self::Surface(m) => IndexInfo::Surface {
                structure: m.structure,
                vertex: m.vertices[offset],
            },
            Self::Voxels(m) => IndexInfo::Voxel {
                structure: m.structure,
                ijk: m.voxels[offset],
            },
        }
    }
}

/// 某个线性索引所对应的 brainordinate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexInfo {
    /// 表面顶点.
    Surface {
        /// 所属结构.
        structure: Structure,
        /// 顶点编号.
        vertex: usize,
    },

    /// 体素.
    Voxel {
        /// 所属结构.
        structure: Structure,
        /// 体素坐标.
        ijk: Ijk,
    },
}

impl IndexInfo {
    /// 所属结构.
    #[inline]
    pub fn structure(&self) -> Structure {
        match self {
            Self::Surface { structure, .. } | Self::Voxel { structure, .. } => *structure,
        }
    }

    /// 模型类型.
    #[inline]
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Surface { .. } => ModelKind::Surface,
            Self::Voxel { .. } => ModelKind::Voxels,
        }
    }
}
