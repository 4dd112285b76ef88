/// 外部命令执行
///
/// 卷管理、挂载、备份仓库等工具都经由此处调用，统一超时与错误格式

use common::{Error, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// 待执行的命令
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn envs(mut self, envs: &HashMap<String, String>) -> Self {
        self.envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// 用于日志与错误信息的命令行（不含环境变量，避免泄露凭据）
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.envs)
            .kill_on_drop(true);
        cmd
    }
}

/// 带超时的命令执行器
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 执行命令并返回原始输出，由调用方解释退出码
    ///
    /// 只有无法启动或超时才返回错误
    pub async fn output(&self, spec: &CommandSpec) -> Result<Output> {
        debug!("Running command: {}", spec.display());

        let child = spec
            .to_command()
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::backend(
                spec.display(),
                None,
                format!("failed to spawn {}: {}", spec.program(), e),
            )),
            Err(_) => Err(Error::backend_timeout(spec.display(), self.timeout.as_secs())),
        }
    }

    /// 执行命令，非零退出码视为后端失败
    pub async fn run(&self, spec: &CommandSpec) -> Result<Output> {
        let output = self.output(spec).await?;

        if !output.status.success() {
            return Err(Error::backend(
                spec.display(),
                output.status.code(),
                combined_output(&output),
            ));
        }

        Ok(output)
    }
}

/// 合并 stdout 与 stderr 作为诊断文本
pub fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut text = stdout.trim().to_string();
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }
    text
}
