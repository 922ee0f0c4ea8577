//! 解剖结构枚举, 以及结构与 CIFTI 结构名之间的固定对照表.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use once_cell::sync::Lazy;

macro_rules! structures {
    ($($(#[$doc:meta])* $variant:ident => $name:literal,)+) => {
        /// CIFTI brain model 可引用的解剖结构.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Structure {
            $($(#[$doc])* $variant,)+
        }

        /// (结构, CIFTI 结构名) 对照表, 按枚举声明顺序排列.
        const STRUCTURE_TABLE: &[(Structure, &str)] = &[
            $((Structure::$variant, $name),)+
        ];
    };
}

structures! {
    /// 左伏隔核.
    AccumbensLeft => "CIFTI_STRUCTURE_ACCUMBENS_LEFT",
    /// 右伏隔核.
    AccumbensRight => "CIFTI_STRUCTURE_ACCUMBENS_RIGHT",
    /// 全部白质.
    AllWhiteMatter => "CIFTI_STRUCTURE_ALL_WHITE_MATTER",
    /// 全部灰质.
    AllGreyMatter => "CIFTI_STRUCTURE_ALL_GREY_MATTER",
    /// 左杏仁核.
    AmygdalaLeft => "CIFTI_STRUCTURE_AMYGDALA_LEFT",
    /// 右杏仁核.
    AmygdalaRight => "CIFTI_STRUCTURE_AMYGDALA_RIGHT",
    /// 脑干.
    BrainStem => "CIFTI_STRUCTURE_BRAIN_STEM",
    /// 左尾状核.
    CaudateLeft => "CIFTI_STRUCTURE_CAUDATE_LEFT",
    /// 右尾状核.
    CaudateRight => "CIFTI_STRUCTURE_CAUDATE_RIGHT",
    /// 左小脑白质.
    CerebellarWhiteMatterLeft => "CIFTI_STRUCTURE_CEREBELLAR_WHITE_MATTER_LEFT",
    /// 右小脑白质.
    CerebellarWhiteMatterRight => "CIFTI_STRUCTURE_CEREBELLAR_WHITE_MATTER_RIGHT",
    /// 小脑.
    Cerebellum => "CIFTI_STRUCTURE_CEREBELLUM",
    /// 左小脑.
    CerebellumLeft => "CIFTI_STRUCTURE_CEREBELLUM_LEFT",
    /// 右小脑.
    CerebellumRight => "CIFTI_STRUCTURE_CEREBELLUM_RIGHT",
    /// 左大脑白质.
    CerebralWhiteMatterLeft => "CIFTI_STRUCTURE_CEREBRAL_WHITE_MATTER_LEFT",
    /// 右大脑白质.
    CerebralWhiteMatterRight => "CIFTI_STRUCTURE_CEREBRAL_WHITE_MATTER_RIGHT",
    /// 皮层 (不分左右).
    Cortex => "CIFTI_STRUCTURE_CORTEX",
    /// 左皮层.
    CortexLeft => "CIFTI_STRUCTURE_CORTEX_LEFT",
    /// 右皮层.
    CortexRight => "CIFTI_STRUCTURE_CORTEX_RIGHT",
    /// 左腹侧间脑.
    DiencephalonVentralLeft => "CIFTI_STRUCTURE_DIENCEPHALON_VENTRAL_LEFT",
    /// 右腹侧间脑.
    DiencephalonVentralRight => "CIFTI_STRUCTURE_DIENCEPHALON_VENTRAL_RIGHT",
    /// 左海马.
    HippocampusLeft => "CIFTI_STRUCTURE_HIPPOCAMPUS_LEFT",
    /// 右海马.
    HippocampusRight => "CIFTI_STRUCTURE_HIPPOCAMPUS_RIGHT",
    /// 无效结构.
    Invalid => "CIFTI_STRUCTURE_INVALID",
    /// 其他.
    Other => "CIFTI_STRUCTURE_OTHER",
    /// 其他灰质.
    OtherGreyMatter => "CIFTI_STRUCTURE_OTHER_GREY_MATTER",
    /// 其他白质.
    OtherWhiteMatter => "CIFTI_STRUCTURE_OTHER_WHITE_MATTER",
    /// 左苍白球.
    PallidumLeft => "CIFTI_STRUCTURE_PALLIDUM_LEFT",
    /// 右苍白球.
    PallidumRight => "CIFTI_STRUCTURE_PALLIDUM_RIGHT",
    /// 左壳核.
    PutamenLeft => "CIFTI_STRUCTURE_PUTAMEN_LEFT",
    /// 右壳核.
    PutamenRight => "CIFTI_STRUCTURE_PUTAMEN_RIGHT",
    /// 左丘脑.
    ThalamusLeft => "CIFTI_STRUCTURE_THALAMUS_LEFT",
    /// 右丘脑.
    ThalamusRight => "CIFTI_STRUCTURE_THALAMUS_RIGHT",
}

static NAME_LOOKUP: Lazy<HashMap<&'static str, Structure>> =
    Lazy::new(|| STRUCTURE_TABLE.iter().map(|&(s, name)| (name, s)).collect());

impl Structure {
    /// 获取 CIFTI 结构名, 如 `CIFTI_STRUCTURE_CORTEX_LEFT`.
    pub fn cifti_name(&self) -> &'static str {
        // 表按枚举声明顺序排列.
        let (s, name) = STRUCTURE_TABLE[*self as usize];
        debug_assert_eq!(s, *self);
        name
    }

    /// 由 CIFTI 结构名查找结构. 名字不在表中时返回 `None`.
    #[inline]
    pub fn from_cifti_name(name: &str) -> Option<Self> {
        NAME_LOOKUP.get(name).copied()
    }

    /// 获取全部结构.
    pub fn all() -> impl ExactSizeIterator<Item = Structure> {
        STRUCTURE_TABLE.iter().map(|&(s, _)| s)
    }
}

impl Display for Structure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cifti_name())
    }
}
