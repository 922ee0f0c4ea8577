//! 运行配置.
//!
//! 打开 `serde` feature 后可以从 TOML 文件读取:
//!
//! ```toml
//! default_version = "V2"
//! byte_order = "Little"
//!
//! [remote]
//! username = "guest"
//! password = "secret"
//! ```

use std::path::PathBuf;

use crate::nifti_io::Endian;
use crate::xml::CiftiVersion;

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::path::Path;

        use serde::Deserialize;

        use crate::error::{CiftiError, CiftiResult};
    }
}

/// 指定配置文件路径的环境变量.
pub const CONFIG_ENV: &str = "CIFTI_DENSE_CONFIG";

/// 新建磁盘文件的字节序.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub enum ByteOrderPref {
    /// 本机字节序.
    #[default]
    Native,
    /// 小端.
    Little,
    /// 大端.
    Big,
}

impl ByteOrderPref {
    /// 实际使用的字节序.
    #[inline]
    pub fn resolve(self) -> Endian {
        match self {
            Self::Native => Endian::native(),
            Self::Little => Endian::Little,
            Self::Big => Endian::Big,
        }
    }
}

/// 远程后端的认证信息.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default, deny_unknown_fields))]
pub struct RemoteConfig {
    /// HTTP basic auth 用户名. 为 `None` 时不认证.
    pub username: Option<String>,
    /// HTTP basic auth 密码.
    pub password: Option<String>,
}

/// 运行配置.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default, deny_unknown_fields))]
pub struct CiftiConfig {
    /// 未指定版本时写出文件使用的 CIFTI 版本.
    pub default_version: CiftiVersion,
    /// 新建磁盘文件的字节序.
    pub byte_order: ByteOrderPref,
    /// 远程后端.
    pub remote: RemoteConfig,
}

/// 默认配置文件位置: `{config_dir}/cifti-dense/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let mut ans = dirs::config_dir()?;
    ans.push("cifti-dense");
    ans.push("config.toml");
    Some(ans)
}

#[cfg(feature = "serde")]
impl CiftiConfig {
    /// 解析 TOML 字符串. 未知字段会导致错误.
    pub fn from_toml_str(s: &str) -> CiftiResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// 读取 TOML 配置文件.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CiftiResult<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(CiftiError::file_io(path))?;
        Self::from_toml_str(&s)
    }

    /// 按以下顺序加载配置:
    ///
    /// 1. 环境变量 [`CONFIG_ENV`] 指定的文件;
    /// 2. [`default_config_path`] (若存在);
    /// 3. 默认配置.
    pub fn load() -> CiftiResult<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }
}
