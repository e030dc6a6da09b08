//! File tools: read, write, list.

use serde_json::json;

use super::Args;
use crate::tools::{SideEffect, ToolDescriptor, ToolKind, ToolRegistry, ToolRequest, ToolResult, ValueType};

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor::new(
            ToolKind::ReadFile,
            SideEffect::Read,
            "Read a text file from the workspace.",
        )
        .param("path", ValueType::String, "Workspace-relative path of the file")
        .returns("path", ValueType::String)
        .returns("content", ValueType::String),
        read_file,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::WriteFile,
            SideEffect::Write,
            "Write a text file in the workspace, creating folders as needed. Replaces existing files.",
        )
        .param("path", ValueType::String, "Workspace-relative path of the file")
        .param("content", ValueType::String, "Text to write")
        .returns("path", ValueType::String)
        .returns("bytes_written", ValueType::Integer),
        write_file,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::ListFiles,
            SideEffect::Read,
            "List the files in one workspace directory, e.g. 'outputs'.",
        )
        .param("directory", ValueType::String, "Workspace-relative directory")
        .returns("directory", ValueType::String)
        .returns("files", ValueType::StringList),
        list_files,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::ListAllFiles,
            SideEffect::Read,
            "List every file in the workspace, grouped by folder ('.' is the root).",
        )
        .returns("files", ValueType::Object),
        list_all_files,
    );
}

async fn read_file(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let path = args.str("path")?;
    let workspace = &req.context.workspace;
    let content = workspace.read_to_string(path).await?;
    let relative = workspace.relative(&workspace.resolve(path)?);
    Ok(json!({ "path": relative, "content": content }))
}

async fn write_file(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let content = args.str("content")?;
    let path = req.context.workspace.write(args.str("path")?, content.as_bytes()).await?;
    Ok(json!({ "path": path, "bytes_written": content.len() }))
}

async fn list_files(req: ToolRequest) -> ToolResult {
    let directory = Args(&req.args).str("directory")?;
    let files = req.context.workspace.list(directory).await?;
    Ok(json!({ "directory": directory, "files": files }))
}

async fn list_all_files(req: ToolRequest) -> ToolResult {
    let files = req.context.workspace.list_all().await?;
    Ok(json!({ "files": files }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use crate::tools::ToolRegistry;
    use crate::tools::testing::context;

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);

        let written = registry
            .invoke("write_file", json!({"path": "tmp/notes.txt", "content": "lattice a=5.69"}))
            .await
            .unwrap();
        assert_eq!(written["path"], "tmp/notes.txt");
        assert_eq!(written["bytes_written"], 14);

        let read = registry
            .invoke("read_file", json!({"path": "./tmp/../tmp/notes.txt"}))
            .await
            .unwrap();
        assert_eq!(read["path"], "tmp/notes.txt");
        assert_eq!(read["content"], "lattice a=5.69");
    }

    #[tokio::test]
    async fn test_write_outside_workspace_is_path_escape() {
        let (dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);

        let err = registry
            .invoke("write_file", json!({"path": "../../etc/passwd", "content": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "path_escape");

        let err = registry
            .invoke("write_file", json!({"path": "/etc/passwd", "content": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "path_escape");
        assert!(!dir.path().join("etc").exists());
    }

    #[tokio::test]
    async fn test_logs_are_hidden() {
        let (dir, ctx) = context();
        std::fs::write(dir.path().join("logs/session.log"), "secret").unwrap();
        let registry = ToolRegistry::with_builtins(ctx);

        let err = registry
            .invoke("read_file", json!({"path": "logs/session.log"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "access_denied");

        let all = registry.invoke("list_all_files", json!({})).await.unwrap();
        assert!(all["files"].get("logs").is_none());
    }

    #[tokio::test]
    async fn test_list_files() {
        let (dir, ctx) = context();
        std::fs::write(dir.path().join("outputs/b.cif"), "").unwrap();
        std::fs::write(dir.path().join("outputs/a.cif"), "").unwrap();
        let registry = ToolRegistry::with_builtins(ctx);

        let listed = registry
            .invoke("list_files", json!({"directory": "outputs"}))
            .await
            .unwrap();
        assert_eq!(listed["files"], json!(["a.cif", "b.cif"]));

        let all = registry.invoke("list_all_files", json!({})).await.unwrap();
        assert_eq!(all["files"]["outputs"], json!(["a.cif", "b.cif"]));

        let err = registry
            .invoke("list_files", json!({"directory": "missing"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
