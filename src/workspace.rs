//! 任务工作区
//!
//! LocalWorkspace 绑定根目录，每个任务一个子目录 `<root>/<task_id>/`；
//! 所有相对路径经 resolve 校验必须落在任务目录下（禁止绝对路径与 ../ 逃逸）。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::core::AgentError;

/// 工作区能力：读、写、列举（list 结果仅用于丰富 prompt）
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn read(&self, task_id: &str, path: &str) -> Result<Vec<u8>, AgentError>;

    async fn write(&self, task_id: &str, path: &str, data: &[u8]) -> Result<(), AgentError>;

    /// 列出 path 下的文件（相对任务目录），目录不存在时返回空
    async fn list(&self, task_id: &str, path: &str) -> Result<Vec<String>, AgentError>;
}

/// 本地文件系统工作区
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root_dir: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn task_dir(&self, task_id: &str) -> Result<PathBuf, AgentError> {
        let mut components = Path::new(task_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root_dir.join(task_id)),
            _ => Err(AgentError::PathEscape(task_id.to_string())),
        }
    }

    /// 解析任务内相对路径；只允许普通路径分量（"." 会被忽略）
    pub fn resolve(&self, task_id: &str, path: &str) -> Result<PathBuf, AgentError> {
        let mut full = self.task_dir(task_id)?;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::CurDir => {}
                _ => return Err(AgentError::PathEscape(path.to_string())), // 如 ../../etc/passwd
            }
        }
        Ok(full)
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn read(&self, task_id: &str, path: &str) -> Result<Vec<u8>, AgentError> {
        let resolved = self.resolve(task_id, path)?;
        tokio::fs::read(&resolved).await.map_err(|e| AgentError::AbilityExecution {
            name: "workspace".to_string(),
            cause: format!("Read failed ({}): {}", path, e),
        })
    }

    async fn write(&self, task_id: &str, path: &str, data: &[u8]) -> Result<(), AgentError> {
        let resolved = self.resolve(task_id, path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| AgentError::AbilityExecution {
                name: "workspace".to_string(),
                cause: format!("Create dir failed: {}", e),
            })?;
        }
        tokio::fs::write(&resolved, data).await.map_err(|e| AgentError::AbilityExecution {
            name: "workspace".to_string(),
            cause: format!("Write failed ({}): {}", path, e),
        })
    }

    async fn list(&self, task_id: &str, path: &str) -> Result<Vec<String>, AgentError> {
        let task_dir = self.task_dir(task_id)?;
        let base = self.resolve(task_id, path)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let walker = WalkDir::new(&base)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| AgentError::AbilityExecution {
                name: "workspace".to_string(),
                cause: format!("List failed: {}", e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&task_dir) {
                entries.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escape() {
        let ws = LocalWorkspace::new("/tmp/ws");
        assert_eq!(
            ws.resolve("t1", "./notes/a.txt").unwrap(),
            PathBuf::from("/tmp/ws/t1/notes/a.txt")
        );
        assert!(matches!(
            ws.resolve("t1", "../t2/secret.txt"),
            Err(AgentError::PathEscape(_))
        ));
        assert!(matches!(
            ws.resolve("t1", "/etc/passwd"),
            Err(AgentError::PathEscape(_))
        ));
        assert!(matches!(
            ws.resolve("../t1", "a.txt"),
            Err(AgentError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());

        assert!(ws.list("t1", ".").await.unwrap().is_empty());

        ws.write("t1", "output.txt", b"lesson").await.unwrap();
        ws.write("t1", "notes/q.xml", b"<questions/>").await.unwrap();
        ws.write("t1", ".hidden", b"x").await.unwrap();
        ws.write("t2", "other.txt", b"x").await.unwrap();

        assert_eq!(ws.read("t1", "output.txt").await.unwrap(), b"lesson");
        assert_eq!(
            ws.list("t1", ".").await.unwrap(),
            vec!["notes/q.xml".to_string(), "output.txt".to_string()]
        );
        assert_eq!(ws.list("t1", "notes").await.unwrap(), vec!["notes/q.xml".to_string()]);
        assert!(ws.read("t1", "missing.txt").await.is_err());
    }
}
