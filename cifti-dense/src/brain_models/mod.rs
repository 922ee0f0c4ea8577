//! brainordinate 稠密映射.
//!
//! 将 (结构, 顶点) 或 (结构, 体素) 与线性索引 `[0, len)` 一一对应.
//! 模型按添加顺序依次占据连续的索引区间, 第一个添加的模型占据 `[0, n)`.

use std::collections::HashMap;

use crate::error::{CiftiError, CiftiResult};
use crate::structure::Structure;
use crate::volume::VolumeSpace;
use crate::Ijk;

mod model;

pub use model::{BrainModel, IndexInfo, ModelKind, SurfaceModel, VoxelModel};

use model::UNMAPPED;

/// brainordinate 稠密映射.
///
/// # 不变量
///
/// 1. 每个结构至多有一个表面模型和一个体素模型.
/// 2. 各模型的索引区间连续, 互不重叠, 按起点升序排列, 共同构成 `[0, len)` 的划分.
/// 3. 表面模型内的顶点互不相同, 且位于 `[0, vertex_count)`.
/// 4. 所有体素模型的体素全局唯一, 非负, 若绑定了体积空间则位于其中.
///
/// 任何一次失败的添加都不会改变已提交的映射.
#[derive(Debug, Clone, Default)]
pub struct BrainModelIndex {
    models: Vec<BrainModel>,
    volume_space: Option<VolumeSpace>,

    // 以下均为派生的查找表.
    surface_models: HashMap<Structure, usize>,
    voxel_models: HashMap<Structure, usize>,
    voxel_lookup: HashMap<Ijk, (usize, Structure)>,
}

impl PartialEq for BrainModelIndex {
    /// 查找表由模型列表派生, 不参与比较.
    fn eq(&self, other: &Self) -> bool {
        self.volume_space == other.volume_space && self.models == other.models
    }
}

impl BrainModelIndex {
    /// 创建空映射.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 重置为空映射 (没有模型, 也没有体积空间).
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 映射的总长度, 即最后一个模型的结束索引. 空映射为 0.
    #[inline]
    pub fn len(&self) -> usize {
        self.models.last().map_or(0, BrainModel::end)
    }

    /// 映射是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 按索引顺序获取全部模型.
    #[inline]
    pub fn models(&self) -> &[BrainModel] {
        &self.models
    }

    /// 获取绑定的体积空间.
    #[inline]
    pub fn volume_space(&self) -> Option<&VolumeSpace> {
        self.volume_space.as_ref()
    }

    /// 是否存在任何体素模型.
    #[inline]
    pub fn has_volume_data_any(&self) -> bool {
        !self.voxel_models.is_empty()
    }

    /// 追加表面模型.
    ///
    /// `vertices` 中第 `p` 个顶点被映射到 `self.len() + p`.
    ///
    /// # 返回值
    ///
    /// - 结构已存在表面模型时, 返回 `Err(CiftiError::DuplicateStructure)`;
    /// - `vertices` 为空时, 返回 `Err(CiftiError::EmptyModel)`;
    /// - `vertex_count < 1`, 或有顶点为负, 不小于 `vertex_count`, 或重复时,
    ///   返回 `Err(CiftiError::InvalidVertex)`.
    pub fn add_surface_model(
        &mut self,
        vertex_count: i64,
        structure: Structure,
        vertices: &[i64],
    ) -> CiftiResult<()> {
        if self.surface_models.contains_key(&structure) {
            return Err(CiftiError::DuplicateStructure(structure));
        }
        let Some(&first) = vertices.first() else {
            return Err(CiftiError::EmptyModel(structure));
        };
        let invalid = |vertex| CiftiError::InvalidVertex {
            structure,
            vertex,
            vertex_count,
        };
        if vertex_count < 1 {
            return Err(invalid(first));
        }

        let Ok(table_len) = usize::try_from(vertex_count) else {
            return Err(invalid(first));
        };
        let mut lookup = Vec::new();
        lookup.try_reserve_exact(table_len).map_err(|_| {
            CiftiError::Allocation(
                (table_len as u64).saturating_mul(std::mem::size_of::<usize>() as u64),
            )
        })?;
        lookup.resize(table_len, UNMAPPED);

        let start = self.len();
        let mut used = Vec::with_capacity(vertices.len());
        for (pos, &vertex) in vertices.iter().enumerate() {
            if !(0..vertex_count).contains(&vertex) {
                return Err(invalid(vertex));
            }
            let slot = &mut lookup[vertex as usize];
            if *slot != UNMAPPED {
                return Err(invalid(vertex));
            }
            *slot = start + pos;
            used.push(vertex as usize);
        }

        self.surface_models.insert(structure, self.models.len());
        self.models.push(BrainModel::Surface(SurfaceModel {
            structure,
            vertex_count: table_len,
            vertices: used,
            lookup,
            start,
        }));
        Ok(())
    }

    /// 追加表面模型, 顶点由 ROI 决定.
    ///
    /// `roi` 为 `None` 时使用全部顶点; 否则顶点 `v` 被使用当且仅当 `roi[v] > 0`.
    /// `roi` 的长度必须等于 `vertex_count`.
    pub fn add_surface_model_roi(
        &mut self,
        vertex_count: i64,
        structure: Structure,
        roi: Option<&[f32]>,
    ) -> CiftiResult<()> {
        let vertices: Vec<i64> = match roi {
            None => (0..vertex_count).collect(),
            Some(roi) => {
                if roi.len() as i64 != vertex_count {
                    return Err(CiftiError::bad_length(
                        roi.len(),
                        format!("ROI 长度应等于顶点数 {vertex_count}"),
                    ));
                }
                roi.iter()
                    .enumerate()
                    .filter_map(|(v, &w)| (w > 0.0).then_some(v as i64))
                    .collect()
            }
        };
        self.add_surface_model(vertex_count, structure, &vertices)
    }

    /// 追加体素模型. `ijk` 为扁平的 `[i, j, k, i, j, k, ...]` 列表.
    ///
    /// # 返回值
    ///
    /// - 结构已存在体素模型时, 返回 `Err(CiftiError::DuplicateStructure)`;
    /// - `ijk` 为空时, 返回 `Err(CiftiError::EmptyModel)`;
    /// - `ijk` 长度不是 3 的倍数时, 返回 `Err(CiftiError::BadLength)`;
    /// - 有坐标为负, 或超出已绑定的体积空间时, 返回 `Err(CiftiError::InvalidVoxel)`;
    /// - 有体素已属于某个模型 (或在 `ijk` 中重复) 时, 返回 `Err(CiftiError::VoxelReuse)`.
    pub fn add_volume_model(&mut self, structure: Structure, ijk: &[i64]) -> CiftiResult<()> {
        if self.voxel_models.contains_key(&structure) {
            return Err(CiftiError::DuplicateStructure(structure));
        }
        if ijk.is_empty() {
            return Err(CiftiError::EmptyModel(structure));
        }
        if ijk.len() % 3 != 0 {
            return Err(CiftiError::bad_length(ijk.len(), "体素坐标列表长度必须是 3 的倍数"));
        }

        // 先在局部查找表中校验全部体素, 通过后才提交.
        let start = self.len();
        let mut pending = HashMap::with_capacity(ijk.len() / 3);
        let mut voxels = Vec::with_capacity(ijk.len() / 3);
        for (pos, triple) in ijk.chunks_exact(3).enumerate() {
            let voxel: Ijk = [triple[0], triple[1], triple[2]];
            let in_space = match &self.volume_space {
                Some(space) => space.contains(&voxel),
                None => voxel.iter().all(|&v| v >= 0),
            };
            if !in_space {
                return Err(CiftiError::InvalidVoxel {
                    structure,
                    ijk: voxel,
                });
            }
            if self.voxel_lookup.contains_key(&voxel)
                || pending.insert(voxel, (start + pos, structure)).is_some()
            {
                return Err(CiftiError::VoxelReuse(voxel));
            }
            voxels.push(voxel);
        }

        self.voxel_lookup.extend(pending);
        self.voxel_models.insert(structure, self.models.len());
        self.models.push(BrainModel::Voxels(VoxelModel {
            structure,
            voxels,
            start,
        }));
        Ok(())
    }

    /// 绑定 (或重新绑定) 体积空间.
    ///
    /// 若已有体素不在新空间内, 返回 `Err(CiftiError::SpaceMismatch)`, 原绑定保持不变.
    pub fn set_volume_space(&mut self, space: VolumeSpace) -> CiftiResult<()> {
        let outside = self
            .models
            .iter()
            .filter_map(|m| match m {
                BrainModel::Voxels(v) => Some(v.voxels.iter()),
                BrainModel::Surface(_) => None,
            })
            .flatten()
            .find(|v| !space.contains(v));
        if let Some(v) = outside {
            return Err(CiftiError::SpaceMismatch(*v));
        }
        self.volume_space = Some(space);
        Ok(())
    }

    /// 获取结构 `structure` 表面上顶点 `vertex` 的线性索引.
    ///
    /// 结构没有表面模型, 顶点越界或未被使用时返回 `None`.
    pub fn index_for_node(&self, vertex: i64, structure: Structure) -> Option<usize> {
        let model = self.surface_model(structure)?;
        usize::try_from(vertex)
            .ok()
            .and_then(|v| model.index_for_vertex(v))
    }

    /// 获取体素的线性索引和所属结构. 接受任意整数坐标, 找不到时返回 `None`.
    #[inline]
    pub fn index_for_voxel(&self, i: i64, j: i64, k: i64) -> Option<(usize, Structure)> {
        self.voxel_lookup.get(&[i, j, k]).copied()
    }

    /// 获取线性索引 `index` 对应的 brainordinate. 越界时返回 `None`.
    ///
    /// 在按起点排序的模型区间上二分, 复杂度为 `O(log(模型数))`.
    pub fn info_for_index(&self, index: usize) -> Option<IndexInfo> {
        if index >= self.len() {
            return None;
        }
        let pos = self.models.partition_point(|m| m.end() <= index);
        let model = &self.models[pos];
        assert!(
            model.range().contains(&index),
            "brain model 区间不构成连续划分: 索引 {index}, 模型区间 {:?}",
            model.range()
        );
        Some(model.info_at(index))
    }

    /// 获取结构的表面模型.
    #[inline]
    pub fn surface_model(&self, structure: Structure) -> Option<&SurfaceModel> {
        match self.models.get(*self.surface_models.get(&structure)?)? {
            BrainModel::Surface(m) => Some(m),
            BrainModel::Voxels(_) => None,
        }
    }

    /// 获取结构的体素模型.
    #[inline]
    pub fn voxel_model(&self, structure: Structure) -> Option<&VoxelModel> {
        match self.models.get(*self.voxel_models.get(&structure)?)? {
            BrainModel::Voxels(m) => Some(m),
            BrainModel::Surface(_) => None,
        }
    }

    /// 结构是否有表面模型.
    #[inline]
    pub fn has_surface_data(&self, structure: Structure) -> bool {
        self.surface_models.contains_key(&structure)
    }

    /// 结构是否有体素模型.
    #[inline]
    pub fn has_volume_data(&self, structure: Structure) -> bool {
        self.voxel_models.contains_key(&structure)
    }

    /// 按索引顺序获取拥有表面模型的结构.
    pub fn surface_structures(&self) -> Vec<Structure> {
        self.structures_of(ModelKind::Surface)
    }

    /// 按索引顺序获取拥有体素模型的结构.
    pub fn volume_structures(&self) -> Vec<Structure> {
        self.structures_of(ModelKind::Voxels)
    }

    fn structures_of(&self, kind: ModelKind) -> Vec<Structure> {
        self.models
            .iter()
            .filter(|m| m.kind() == kind)
            .map(BrainModel::structure)
            .collect()
    }

    /// 获取结构表面的顶点总数.
    #[inline]
    pub fn surface_vertex_count(&self, structure: Structure) -> Option<usize> {
        self.surface_model(structure).map(SurfaceModel::vertex_count)
    }

    /// 获取结构表面被使用的顶点列表. 返回值的生命周期与 `self` 绑定.
    #[inline]
    pub fn vertex_list(&self, structure: Structure) -> Option<&[usize]> {
        self.surface_model(structure).map(SurfaceModel::vertices)
    }

    /// 获取结构的体素列表. 返回值的生命周期与 `self` 绑定.
    #[inline]
    pub fn voxel_list(&self, structure: Structure) -> Option<&[Ijk]> {
        self.voxel_model(structure).map(VoxelModel::voxels)
    }

    /// 获取结构表面的 (顶点, 线性索引) 对, 按线性索引升序排列.
    pub fn surface_map(&self, structure: Structure) -> Vec<(usize, usize)> {
        self.surface_model(structure).map_or_else(Vec::new, |m| {
            m.vertices
                .iter()
                .enumerate()
                .map(|(pos, &v)| (v, m.start + pos))
                .collect()
        })
    }

    /// 获取结构的 (体素, 线性索引) 对, 按线性索引升序排列.
    pub fn volume_structure_map(&self, structure: Structure) -> Vec<(Ijk, usize)> {
        self.voxel_model(structure).map_or_else(Vec::new, |m| {
            m.voxels
                .iter()
                .enumerate()
                .map(|(pos, &v)| (v, m.start + pos))
                .collect()
        })
    }

    /// 获取全部体素模型的 (体素, 线性索引) 对, 按线性索引升序排列.
    pub fn full_volume_map(&self) -> Vec<(Ijk, usize)> {
        self.volume_structures()
            .into_iter()
            .flat_map(|s| self.volume_structure_map(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{BrainModelIndex, IndexInfo, ModelKind};
    use crate::error::CiftiError;
    use crate::structure::Structure::{self, *};
    use crate::volume::VolumeSpace;

    /// 一个表面模型 + 一个体素模型.
    fn scenario() -> BrainModelIndex {
        let mut index = BrainModelIndex::new();
        index.add_surface_model(4, CortexLeft, &[0, 2, 3]).unwrap();
        index
            .add_volume_model(Cerebellum, &[0, 0, 0, 1, 0, 0])
            .unwrap();
        index
    }

    #[test]
    fn test_scenario_lookup() {
        let index = scenario();
        assert_eq!(index.len(), 5);
        assert_eq!(index.index_for_node(2, CortexLeft), Some(1));
        assert_eq!(index.index_for_node(1, CortexLeft), None);
        assert_eq!(index.index_for_node(4, CortexLeft), None);
        assert_eq!(index.index_for_node(-1, CortexLeft), None);
        assert_eq!(index.index_for_node(0, CortexRight), None);
        assert_eq!(index.index_for_voxel(1, 0, 0), Some((4, Cerebellum)));
        assert_eq!(
            index.info_for_index(3),
            Some(IndexInfo::Voxel {
                structure: Cerebellum,
                ijk: [0, 0, 0]
            })
        );
        assert_eq!(index.info_for_index(3).unwrap().kind(), ModelKind::Voxels);
        assert_eq!(index.info_for_index(5), None);
    }

    #[test]
    fn test_info_follows_input_order() {
        let mut index = BrainModelIndex::new();
        let surfaces: [(Structure, i64, Vec<i64>); 2] = [
            (CortexLeft, 10, vec![9, 1, 5, 0]),
            (CortexRight, 3, vec![2, 0]),
        ];
        for (s, count, vertices) in &surfaces {
            index.add_surface_model(*count, *s, vertices).unwrap();
        }
        let voxels = [0, 0, 1, 5, 4, 3, 2, 2, 2];
        index.add_volume_model(ThalamusLeft, &voxels).unwrap();
        index.add_volume_model(ThalamusRight, &[7, 7, 7]).unwrap();

        assert_eq!(index.len(), 4 + 2 + 3 + 1);
        let mut i = 0;
        for (s, _, vertices) in &surfaces {
            for &v in vertices {
                assert_eq!(
                    index.info_for_index(i),
                    Some(IndexInfo::Surface {
                        structure: *s,
                        vertex: v as usize
                    })
                );
                i += 1;
            }
        }
        for triple in voxels.chunks(3) {
            let info = index.info_for_index(i).unwrap();
            assert_eq!(
                info,
                IndexInfo::Voxel {
                    structure: ThalamusLeft,
                    ijk: [triple[0], triple[1], triple[2]]
                }
            );
            assert_eq!(
                index.index_for_voxel(triple[0], triple[1], triple[2]),
                Some((i, ThalamusLeft))
            );
            i += 1;
        }
        assert_eq!(index.index_for_voxel(7, 7, 7), Some((9, ThalamusRight)));
        assert_eq!(index.index_for_voxel(-7, 7, 7), None);
        assert_eq!(index.index_for_voxel(1, 1, 1), None);
        assert_eq!(index.surface_structures(), vec![CortexLeft, CortexRight]);
        assert_eq!(index.volume_structures(), vec![ThalamusLeft, ThalamusRight]);
        assert_eq!(index.surface_map(CortexRight), vec![(2, 4), (0, 5)]);
        assert_eq!(index.full_volume_map().len(), 4);
    }

    #[test]
    fn test_surface_errors() {
        let mut index = scenario();
        let before = index.clone();

        let e = index.add_surface_model(4, CortexLeft, &[1]).unwrap_err();
        assert!(matches!(e, CiftiError::DuplicateStructure(CortexLeft)));
        let e = index.add_surface_model(4, CortexRight, &[]).unwrap_err();
        assert!(matches!(e, CiftiError::EmptyModel(CortexRight)));
        let e = index.add_surface_model(0, CortexRight, &[0]).unwrap_err();
        assert!(matches!(e, CiftiError::InvalidVertex { .. }));
        let e = index.add_surface_model(4, CortexRight, &[4]).unwrap_err();
        assert!(matches!(e, CiftiError::InvalidVertex { vertex: 4, .. }));
        let e = index.add_surface_model(4, CortexRight, &[-1]).unwrap_err();
        assert!(matches!(e, CiftiError::InvalidVertex { vertex: -1, .. }));
        let e = index.add_surface_model(4, CortexRight, &[1, 2, 1]).unwrap_err();
        assert!(matches!(e, CiftiError::InvalidVertex { vertex: 1, .. }));
        // 无法分配的顶点数报告为分配失败, 而不是 panic.
        let e = index.add_surface_model(i64::MAX, CortexRight, &[0]).unwrap_err();
        assert!(matches!(e, CiftiError::Allocation(_)));

        assert_eq!(index, before);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_volume_errors_never_commit() {
        let mut index = scenario();
        let before = index.clone();

        for bad in [vec![0], vec![0, 0], vec![1, 1, 1, 2]] {
            let e = index.add_volume_model(PutamenLeft, &bad).unwrap_err();
            assert!(matches!(e, CiftiError::BadLength { .. }));
        }
        let e = index.add_volume_model(PutamenLeft, &[]).unwrap_err();
        assert!(matches!(e, CiftiError::EmptyModel(PutamenLeft)));
        let e = index.add_volume_model(Cerebellum, &[5, 5, 5]).unwrap_err();
        assert!(matches!(e, CiftiError::DuplicateStructure(Cerebellum)));
        let e = index.add_volume_model(PutamenLeft, &[3, -1, 0]).unwrap_err();
        assert!(matches!(e, CiftiError::InvalidVoxel { .. }));

        // 第一个体素合法, 第二个与已有体素冲突: 第一个也不能被提交.
        let e = index
            .add_volume_model(PutamenLeft, &[9, 9, 9, 1, 0, 0])
            .unwrap_err();
        assert!(matches!(e, CiftiError::VoxelReuse([1, 0, 0])));
        assert_eq!(index.index_for_voxel(9, 9, 9), None);

        let e = index
            .add_volume_model(PutamenLeft, &[8, 8, 8, 8, 8, 8])
            .unwrap_err();
        assert!(matches!(e, CiftiError::VoxelReuse([8, 8, 8])));
        assert_eq!(index.index_for_voxel(8, 8, 8), None);

        assert_eq!(index, before);
        assert!(!index.has_volume_data(PutamenLeft));
    }

    #[test]
    fn test_volume_space_binding() {
        let mut index = BrainModelIndex::new();
        index
            .set_volume_space(VolumeSpace::with_unit_sform([2, 2, 2]).unwrap())
            .unwrap();
        let e = index.add_volume_model(Cerebellum, &[2, 0, 0]).unwrap_err();
        assert!(matches!(e, CiftiError::InvalidVoxel { .. }));
        index.add_volume_model(Cerebellum, &[1, 1, 1]).unwrap();

        let small = VolumeSpace::with_unit_sform([1, 1, 1]).unwrap();
        let e = index.set_volume_space(small).unwrap_err();
        assert!(matches!(e, CiftiError::SpaceMismatch([1, 1, 1])));
        assert_eq!(index.volume_space().unwrap().dims(), [2, 2, 2]);

        let large = VolumeSpace::with_unit_sform([3, 3, 3]).unwrap();
        index.set_volume_space(large.clone()).unwrap();
        assert_eq!(index.volume_space(), Some(&large));
    }

    #[test]
    fn test_roi_and_equality() {
        let mut a = BrainModelIndex::new();
        a.add_surface_model_roi(4, CortexLeft, Some(&[1.0, 0.0, 0.5, -1.0]))
            .unwrap();
        assert_eq!(a.vertex_list(CortexLeft), Some(&[0, 2][..]));
        a.add_surface_model_roi(3, CortexRight, None).unwrap();
        assert_eq!(a.vertex_list(CortexRight), Some(&[0, 1, 2][..]));
        assert!(a.add_surface_model_roi(3, Cortex, Some(&[1.0])).is_err());

        let mut b = BrainModelIndex::new();
        b.add_surface_model(4, CortexLeft, &[0, 2]).unwrap();
        b.add_surface_model(3, CortexRight, &[0, 1, 2]).unwrap();
        assert_eq!(a, b);

        // 顺序不同则不相等.
        let mut c = BrainModelIndex::new();
        c.add_surface_model(3, CortexRight, &[0, 1, 2]).unwrap();
        c.add_surface_model(4, CortexLeft, &[0, 2]).unwrap();
        assert_ne!(a, c);

        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.len(), 0);
        assert_eq!(c, BrainModelIndex::new());
    }
}
