/// 脚本化的卷后端替身
///
/// 在内存中模拟精简池，记录每一次调用，可按操作注入失败

use async_trait::async_trait;
use common::{ByteSize, Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::driver::{ThinPool, Volume, VolumeBackend};

/// 记录下来的后端调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeCall {
    List,
    Create(String, ByteSize),
    Extend(String, ByteSize),
    Remove(String),
    QueryMount(PathBuf),
    Mount(PathBuf, PathBuf),
    Unmount(PathBuf),
    CopyTree(PathBuf, PathBuf),
}

impl VolumeCall {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Create(..) | Self::Extend(..) | Self::Remove(..) | Self::Mount(..) | Self::Unmount(..)
        )
    }
}

#[derive(Debug, Clone)]
struct FakeVolume {
    size: ByteSize,
    target: Option<PathBuf>,
}

#[derive(Default)]
struct State {
    volumes: BTreeMap<String, FakeVolume>,
    calls: Vec<VolumeCall>,
    fail_ops: HashSet<&'static str>,
}

pub struct FakeVolumeBackend {
    vg_name: String,
    thin: bool,
    state: Mutex<State>,
}

impl FakeVolumeBackend {
    pub fn new(vg_name: &str) -> Self {
        Self {
            vg_name: vg_name.to_string(),
            thin: true,
            state: Mutex::new(State::default()),
        }
    }

    /// 模拟一个不是精简池的 LV
    pub fn not_thin(mut self) -> Self {
        self.thin = false;
        self
    }

    pub fn with_volume(self, name: &str, size: ByteSize) -> Self {
        self.state.lock().unwrap().volumes.insert(
            name.to_string(),
            FakeVolume { size, target: None },
        );
        self
    }

    /// 让指定操作（"create" / "mkfs" / "extend" / "remove" / "mount" / "unmount" /
    /// "query_mount" / "list" / "copy_tree"）返回后端失败
    pub fn fail_on(&self, op: &'static str) {
        self.state.lock().unwrap().fail_ops.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_ops.clear();
    }

    pub fn calls(&self) -> Vec<VolumeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<VolumeCall> {
        self.calls().into_iter().filter(VolumeCall::is_mutation).collect()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// 当前所有仍处于挂载状态的 (设备, 挂载点)
    pub fn active_mounts(&self) -> Vec<(String, PathBuf)> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .iter()
            .filter_map(|(name, v)| v.target.clone().map(|t| (name.clone(), t)))
            .collect()
    }

    pub fn mount_target(&self, name: &str) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .get(name)
            .and_then(|v| v.target.clone())
    }

    fn record(&self, call: VolumeCall, op: &'static str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.fail_ops.contains(op) {
            return Err(Error::backend(format!("fake {}", op), Some(5), format!("{} failed", op)));
        }
        Ok(())
    }

    fn name_of(&self, device: &Path) -> String {
        device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VolumeBackend for FakeVolumeBackend {
    async fn pool_is_thin(&self, pool: &ThinPool) -> Result<bool> {
        Ok(self.thin && pool.vg_name == self.vg_name)
    }

    async fn list_volumes(&self, _pool: &ThinPool) -> Result<Vec<Volume>> {
        self.record(VolumeCall::List, "list")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .map(|(name, v)| Volume {
                name: name.clone(),
                vg_name: self.vg_name.clone(),
                attr: "Vwi-a-tz--".to_string(),
                size: v.size,
                mounted: v.target.is_some(),
                target: v.target.clone(),
            })
            .collect())
    }

    async fn create_volume(&self, _pool: &ThinPool, name: &str, size: ByteSize) -> Result<()> {
        self.record(VolumeCall::Create(name.to_string(), size), "create")?;
        let mut state = self.state.lock().unwrap();
        if state.volumes.contains_key(name) {
            return Err(Error::backend("fake create", Some(5), format!("{} already exists", name)));
        }
        state
            .volumes
            .insert(name.to_string(), FakeVolume { size, target: None });
        // 卷已分配但格式化失败，留下半成品
        if state.fail_ops.contains("mkfs") {
            return Err(Error::backend("fake mkfs.xfs", Some(1), format!("cannot format {}", name)));
        }
        Ok(())
    }

    async fn extend_volume(&self, _pool: &ThinPool, name: &str, size: ByteSize) -> Result<()> {
        self.record(VolumeCall::Extend(name.to_string(), size), "extend")?;
        let mut state = self.state.lock().unwrap();
        let volume = state
            .volumes
            .get_mut(name)
            .ok_or_else(|| Error::backend("fake extend", Some(5), format!("{} not found", name)))?;
        volume.size = size;
        Ok(())
    }

    async fn remove_volume(&self, _pool: &ThinPool, name: &str) -> Result<()> {
        self.record(VolumeCall::Remove(name.to_string()), "remove")?;
        let mut state = self.state.lock().unwrap();
        state
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::backend("fake remove", Some(5), format!("{} not found", name)))
    }

    async fn query_mount(&self, device: &Path) -> Result<Option<PathBuf>> {
        self.record(VolumeCall::QueryMount(device.to_path_buf()), "query_mount")?;
        let name = self.name_of(device);
        let state = self.state.lock().unwrap();
        Ok(state.volumes.get(&name).and_then(|v| v.target.clone()))
    }

    async fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        self.record(VolumeCall::Mount(device.to_path_buf(), target.to_path_buf()), "mount")?;
        let name = self.name_of(device);
        let mut state = self.state.lock().unwrap();
        let volume = state
            .volumes
            .get_mut(&name)
            .ok_or_else(|| Error::backend("fake mount", Some(32), "special device does not exist"))?;
        if volume.target.is_some() {
            return Err(Error::backend("fake mount", Some(32), "already mounted"));
        }
        volume.target = Some(target.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, device: &Path) -> Result<()> {
        self.record(VolumeCall::Unmount(device.to_path_buf()), "unmount")?;
        let name = self.name_of(device);
        let mut state = self.state.lock().unwrap();
        match state.volumes.get_mut(&name) {
            Some(volume) if volume.target.is_some() => {
                volume.target = None;
                Ok(())
            }
            _ => Err(Error::backend("fake umount", Some(32), "not mounted")),
        }
    }

    async fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()> {
        self.record(
            VolumeCall::CopyTree(source.to_path_buf(), destination.to_path_buf()),
            "copy_tree",
        )
    }

    fn backend_type(&self) -> &str {
        "fake"
    }
}
