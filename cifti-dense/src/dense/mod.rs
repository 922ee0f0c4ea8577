//! CIFTI dense 文件.
//!
//! [`DenseFile`] 持有 XML 文档 (每一维一个索引映射) 和至多一个存储后端.
//! 状态:
//!
//! 1. 未初始化: 没有 XML, 任何数据访问都返回 `Err(CiftiError::UninitializedAccess)`;
//! 2. 已绑定映射, 没有后端: 读取得到全 0 (数据尚未写入);
//! 3. 只读后端: 刚打开的磁盘文件或远程数据;
//! 4. 可写后端: 第一次写入时惰性确定 (内存, 或 [`DenseFile::set_writing_file`] 指定的磁盘文件).
//!
//! 更换后端时总是先把旧后端的全部行复制到新后端, 再丢弃旧后端.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::brain_models::BrainModelIndex;
use crate::config::CiftiConfig;
use crate::error::{CiftiError, CiftiResult};
use crate::storage::{
    check_column, copy_rows, row_number, BackendKind, InMemoryStorage, OnDiskStorage, RowStorage,
    StorageBackend,
};
use crate::structure::Structure;
use crate::xml::{CiftiVersion, CiftiXml};

cfg_if::cfg_if! {
    if #[cfg(feature = "remote")] {
        use crate::config::RemoteConfig;
        use crate::storage::RemoteStorage;
    }
}

/// 比较两个路径是否指向同一个文件.
///
/// 文件存在时比较规范路径; 不存在时规范化其父目录再拼接文件名.
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_owned(),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    canonical_path(a) == canonical_path(b)
}

/// CIFTI dense 文件.
///
/// 单线程使用: 读取也需要 `&mut self`, 因为磁盘后端会移动文件位置.
/// 需要并行读取时, 请为每个线程打开独立的实例.
#[derive(Debug, Default)]
pub struct DenseFile {
    config: CiftiConfig,
    xml: Option<CiftiXml>,
    dims: Vec<usize>,
    backend: Option<StorageBackend>,
    /// 惰性创建写后端时使用的目标文件.
    writing_file: Option<(PathBuf, CiftiVersion)>,
    /// 当前后端是否已经可以写入.
    write_ready: bool,
    /// [`DenseFile::set_cifti_xml`] 指定的写出版本.
    preferred_version: Option<CiftiVersion>,
}

impl DenseFile {
    /// 使用默认配置创建未初始化的文件.
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定配置创建未初始化的文件.
    pub fn with_config(config: CiftiConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &CiftiConfig {
        &self.config
    }

    fn reset(&mut self) {
        self.backend = None;
        self.xml = None;
        self.dims.clear();
        self.writing_file = None;
        self.write_ready = false;
        self.preferred_version = None;
    }

    fn bind(&mut self, xml: CiftiXml, backend: StorageBackend) {
        self.dims = backend.dims().to_vec();
        self.xml = Some(xml);
        self.backend = Some(backend);
    }

    /// 打开磁盘上的 CIFTI 文件 (只读).
    ///
    /// 先释放旧后端; 打开失败时文件处于未初始化状态.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> CiftiResult<()> {
        self.reset();
        let (disk, xml) = OnDiskStorage::open(path.as_ref())?;
        self.bind(xml, StorageBackend::OnDisk(disk));
        Ok(())
    }

    /// 连接远程 CIFTI 数据 (只读).
    ///
    /// 先释放旧后端; 连接失败时文件处于未初始化状态.
    #[cfg(feature = "remote")]
    pub fn open_url(&mut self, url: &str, auth: &RemoteConfig) -> CiftiResult<()> {
        self.reset();
        let (remote, xml) = RemoteStorage::open(url, auth)?;
        self.bind(xml, StorageBackend::Remote(remote));
        Ok(())
    }

    /// 使用配置中的认证信息连接远程数据.
    #[cfg(feature = "remote")]
    pub fn open_url_default(&mut self, url: &str) -> CiftiResult<()> {
        let auth = self.config.remote.clone();
        self.open_url(url, &auth)
    }

    /// 设置新的映射. 旧后端及其数据被丢弃.
    ///
    /// `use_old_metadata` 为 `true` 时保留旧文档的文件级元数据.
    /// `version` 为 `Some` 时, 映射必须能以该版本编码, 之后
    /// [`DenseFile::write_file_default`] 使用该版本; 为 `None` 时使用配置中的默认版本.
    /// [`DenseFile::write_file`] 与 [`DenseFile::set_writing_file`] 总是使用各自的参数.
    ///
    /// # 返回值
    ///
    /// - 映射没有任何维度时, 返回 `Err(CiftiError::EmptyMapping)`;
    /// - 有维度长度未确定时, 返回 `Err(CiftiError::UnresolvedLength)`;
    /// - 映射无法以 `version` 编码时, 返回相应的编码错误.
    pub fn set_cifti_xml(
        &mut self,
        mut xml: CiftiXml,
        use_old_metadata: bool,
        version: Option<CiftiVersion>,
    ) -> CiftiResult<()> {
        if xml.number_of_dims() == 0 {
            return Err(CiftiError::EmptyMapping);
        }
        let dims = xml.dims()?;
        if let Some(version) = version {
            xml.to_bytes(version)?;
        }
        if use_old_metadata {
            if let Some(old) = &self.xml {
                *xml.metadata_mut() = old.metadata().clone();
            }
        }
        self.backend = None;
        self.write_ready = false;
        self.dims = dims;
        self.xml = Some(xml);
        self.preferred_version = version;
        Ok(())
    }

    /// 指定第一次写入时创建的磁盘文件. 当前后端失去写能力, 但仍可读.
    pub fn set_writing_file<P: AsRef<Path>>(&mut self, path: P, version: CiftiVersion) {
        self.writing_file = Some((path.as_ref().to_owned(), version));
        self.write_ready = false;
    }

    /// 当前后端是否为读取 `path` 的磁盘后端.
    fn reads_from(&self, path: &Path) -> bool {
        self.backend
            .as_ref()
            .and_then(StorageBackend::as_on_disk)
            .is_some_and(|disk| same_file(disk.path(), path))
    }

    /// 将数据复制到内存后端 (已在内存中时无操作).
    fn snapshot_to_memory(&mut self) -> CiftiResult<()> {
        let in_memory = self.backend.as_ref().is_some_and(|b| b.kind() == BackendKind::Memory);
        if self.xml.is_none() || in_memory {
            return Ok(());
        }
        let mut memory = InMemoryStorage::new(&self.dims)?;
        if let Some(backend) = self.backend.as_mut() {
            debug!("将 {:?} 后端复制到内存", backend.kind());
            copy_rows(backend, &mut memory)?;
        }
        self.backend = Some(StorageBackend::Memory(memory));
        Ok(())
    }

    /// 将全部数据读入内存. 之后的写入都发生在内存中. 重复调用无副作用.
    pub fn convert_to_in_memory(&mut self) -> CiftiResult<()> {
        self.snapshot_to_memory()?;
        if self.xml.is_some() {
            self.writing_file = None;
            self.write_ready = true;
        }
        Ok(())
    }

    /// 第一次写入前确定写后端.
    fn verify_writer(&mut self) -> CiftiResult<()> {
        if self.write_ready {
            return Ok(());
        }
        match self.writing_file.clone() {
            None => self.snapshot_to_memory()?,
            Some((path, version)) => {
                // 目标正是当前读取的文件: 先读入内存, 再截断重写.
                if self.reads_from(&path) {
                    self.snapshot_to_memory()?;
                }
                let xml = self.xml.as_ref().ok_or(CiftiError::UninitializedAccess)?;
                let endian = self.config.byte_order.resolve();
                let mut writer = OnDiskStorage::create(&path, xml, version, endian)?;
                if let Some(backend) = self.backend.as_mut() {
                    copy_rows(backend, &mut writer)?;
                }
                debug!("写后端: {path:?}");
                self.backend = Some(StorageBackend::OnDisk(writer));
            }
        }
        self.write_ready = true;
        Ok(())
    }

    /// 以 `version` 将全部数据写入 `path`.
    ///
    /// `path` 正是当前读取的文件时: 版本相同则无操作; 版本不同则先把数据读入内存,
    /// 重写文件后改为从新文件读取. 其他情况下当前后端保持不变.
    pub fn write_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        version: CiftiVersion,
    ) -> CiftiResult<()> {
        let path = path.as_ref();
        if self.xml.is_none() {
            return Err(CiftiError::UninitializedAccess);
        }
        info!("写出 {path:?} (CIFTI-{})", version.as_str());

        let collision = self.reads_from(path);
        if collision {
            if self.on_disk_version() == Some(version) {
                debug!("{path:?} 即当前文件, 版本相同, 无需写出");
                return Ok(());
            }
            self.snapshot_to_memory()?;
        }

        let xml = self.xml.as_ref().ok_or(CiftiError::UninitializedAccess)?;
        let endian = self.config.byte_order.resolve();
        let mut writer = OnDiskStorage::create(path, xml, version, endian)?;
        if let Some(backend) = self.backend.as_mut() {
            copy_rows(backend, &mut writer)?;
        }
        writer.flush()?;

        if collision {
            self.write_ready = self
                .writing_file
                .as_ref()
                .is_some_and(|(p, v)| *v == version && same_file(p, path));
            self.backend = Some(StorageBackend::OnDisk(writer));
        }
        Ok(())
    }

    /// 以 [`DenseFile::set_cifti_xml`] 指定的版本写出, 未指定时使用配置中的默认版本.
    pub fn write_file_default<P: AsRef<Path>>(&mut self, path: P) -> CiftiResult<()> {
        let version = self.preferred_version.unwrap_or(self.config.default_version);
        self.write_file(path, version)
    }

    fn check_initialized(&self) -> CiftiResult<()> {
        match self.xml {
            Some(_) => Ok(()),
            None => Err(CiftiError::UninitializedAccess),
        }
    }

    fn check_matrix(&self) -> CiftiResult<()> {
        self.check_initialized()?;
        if self.dims.len() == 2 {
            Ok(())
        } else {
            Err(CiftiError::WrongRank {
                expected: 2,
                found: self.dims.len(),
            })
        }
    }

    /// 读取 `index_select` (对应 `dims[1..]`) 选出的行.
    pub fn get_row(&mut self, index_select: &[usize], out: &mut [f32]) -> CiftiResult<()> {
        self.check_initialized()?;
        row_number(&self.dims, index_select, out.len())?;
        match self.backend.as_mut() {
            Some(backend) => backend.get_row(index_select, out),
            None => {
                out.fill(0.0);
                Ok(())
            }
        }
    }

    /// 读取二维矩阵的第 `index` 行.
    pub fn get_row_2d(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()> {
        self.check_matrix()?;
        self.get_row(&[index], out)
    }

    /// 读取二维矩阵的第 `index` 列.
    pub fn get_column(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()> {
        self.check_matrix()?;
        check_column(&self.dims, index, out.len())?;
        match self.backend.as_mut() {
            Some(backend) => backend.get_column(index, out),
            None => {
                out.fill(0.0);
                Ok(())
            }
        }
    }

    /// 写入 `index_select` 选出的行.
    pub fn set_row(&mut self, index_select: &[usize], data: &[f32]) -> CiftiResult<()> {
        self.check_initialized()?;
        row_number(&self.dims, index_select, data.len())?;
        self.verify_writer()?;
        self.backend_mut()?.set_row(index_select, data)
    }

    /// 写入二维矩阵的第 `index` 行.
    pub fn set_row_2d(&mut self, index: usize, data: &[f32]) -> CiftiResult<()> {
        self.check_matrix()?;
        self.set_row(&[index], data)
    }

    /// 写入二维矩阵的第 `index` 列.
    pub fn set_column(&mut self, index: usize, data: &[f32]) -> CiftiResult<()> {
        self.check_matrix()?;
        check_column(&self.dims, index, data.len())?;
        self.verify_writer()?;
        self.backend_mut()?.set_column(index, data)
    }

    fn backend_mut(&mut self) -> CiftiResult<&mut StorageBackend> {
        self.backend.as_mut().ok_or(CiftiError::UninitializedAccess)
    }

    /// XML 文档.
    #[inline]
    pub fn cifti_xml(&self) -> Option<&CiftiXml> {
        self.xml.as_ref()
    }

    /// 第 `dim` 维的 brainordinate 映射.
    #[inline]
    pub fn brain_models(&self, dim: usize) -> Option<&BrainModelIndex> {
        self.xml.as_ref()?.brain_models(dim)
    }

    /// 第 `dim` 维中结构 `structure` 表面被使用的顶点.
    #[inline]
    pub fn vertex_list(&self, dim: usize, structure: Structure) -> Option<&[usize]> {
        self.brain_models(dim)?.vertex_list(structure)
    }

    /// 各维长度. 未初始化时为空.
    #[inline]
    pub fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    /// 行长度 (`dims[0]`).
    #[inline]
    pub fn row_length(&self) -> usize {
        self.dims.first().copied().unwrap_or(0)
    }

    /// 行数 (`dims[1..]` 之积). 未初始化时为 0.
    pub fn number_of_rows(&self) -> usize {
        match self.dims.split_first() {
            Some((_, tail)) => tail.iter().product(),
            None => 0,
        }
    }

    /// 数据是否完全位于内存中.
    #[inline]
    pub fn is_in_memory(&self) -> bool {
        self.backend.as_ref().is_some_and(RowStorage::is_in_memory)
    }

    /// 当前磁盘后端的 CIFTI 版本.
    #[inline]
    pub fn on_disk_version(&self) -> Option<CiftiVersion> {
        self.backend
            .as_ref()
            .and_then(StorageBackend::as_on_disk)
            .map(OnDiskStorage::version)
    }

    /// 当前后端的类型.
    #[inline]
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(StorageBackend::kind)
    }
}
