//! 体积空间: 体素网格的维度与 IJK -> XYZ 仿射变换.

use crate::Ijk;

/// 比较仿射矩阵时使用的相对容差.
const SFORM_TOLERANCE: f32 = 1e-5;

/// 体积空间. 所有体素模型共享同一个体积空间.
///
/// `sform` 以毫米为单位, 按行存储仿射矩阵的前三行:
/// `xyz = sform * [i, j, k, 1]^T`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeSpace {
    dims: [i64; 3],
    sform: [[f32; 4]; 3],
}

impl VolumeSpace {
    /// 由维度和仿射矩阵创建体积空间.
    ///
    /// 任一维度小于 1 时返回 `None`.
    pub fn new(dims: [i64; 3], sform: [[f32; 4]; 3]) -> Option<Self> {
        dims.iter()
            .all(|&d| d > 0)
            .then_some(Self { dims, sform })
    }

    /// 以单位体素尺寸 (1mm 各向同性, 原点为 0) 创建体积空间.
    pub fn with_unit_sform(dims: [i64; 3]) -> Option<Self> {
        Self::new(
            dims,
            [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        )
    }

    /// 获取 `[i, j, k]` 三个方向的体素个数.
    #[inline]
    pub fn dims(&self) -> [i64; 3] {
        self.dims
    }

    /// 获取仿射矩阵 (毫米).
    #[inline]
    pub fn sform(&self) -> &[[f32; 4]; 3] {
        &self.sform
    }

    /// 体素坐标是否位于该空间内. 负坐标总是返回 `false`.
    #[inline]
    pub fn contains(&self, ijk: &Ijk) -> bool {
        ijk.iter().zip(self.dims.iter()).all(|(&v, &d)| (0..d).contains(&v))
    }

    /// 将体素坐标映射到空间坐标 (毫米).
    pub fn index_to_space(&self, [i, j, k]: Ijk) -> [f32; 3] {
        let (i, j, k) = (i as f32, j as f32, k as f32);
        self.sform.map(|[a, b, c, d]| a * i + b * j + c * k + d)
    }

    /// 体素总数.
    #[inline]
    pub fn voxel_count(&self) -> i64 {
        self.dims.iter().product()
    }
}

impl PartialEq for VolumeSpace {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims
            && self
                .sform
                .iter()
                .flatten()
                .zip(other.sform.iter().flatten())
                .all(|(&a, &b)| {
                    let scale = a.abs().max(b.abs()).max(1.0);
                    (a - b).abs() <= SFORM_TOLERANCE * scale
                })
    }
}

#[cfg(test)]
mod tests {
    use super::VolumeSpace;

    #[test]
    fn test_contains() {
        let space = VolumeSpace::with_unit_sform([2, 3, 4]).unwrap();
        assert!(space.contains(&[0, 0, 0]));
        assert!(space.contains(&[1, 2, 3]));
        assert!(!space.contains(&[2, 0, 0]));
        assert!(!space.contains(&[0, 0, -1]));
        assert_eq!(space.voxel_count(), 24);
        assert!(VolumeSpace::with_unit_sform([0, 1, 1]).is_none());
    }

    #[test]
    fn test_index_to_space() {
        let space = VolumeSpace::new(
            [91, 109, 91],
            [
                [-2.0, 0.0, 0.0, 90.0],
                [0.0, 2.0, 0.0, -126.0],
                [0.0, 0.0, 2.0, -72.0],
            ],
        )
        .unwrap();
        assert_eq!(space.index_to_space([45, 63, 36]), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_tolerant_eq() {
        let a = VolumeSpace::with_unit_sform([2, 2, 2]).unwrap();
        let mut sform = *a.sform();
        sform[0][0] += 1e-7;
        let b = VolumeSpace::new([2, 2, 2], sform).unwrap();
        assert_eq!(a, b);
        sform[0][0] += 0.5;
        let c = VolumeSpace::new([2, 2, 2], sform).unwrap();
        assert_ne!(a, c);
    }
}
