//! Loads [`FunctionSpec`]/[`AgentSpec`] definitions from a directory of
//! `*.toml` files, recursively. Each file holds exactly one spec.

use std::path::Path;

use super::types::{AgentSpec, FunctionSpec};

fn walk_toml_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_toml_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "toml") {
            out.push(path);
        }
    }
    Ok(())
}

pub fn load_function_specs(dir: &Path) -> Result<Vec<FunctionSpec>, String> {
    let mut files = Vec::new();
    walk_toml_files(dir, &mut files).map_err(|e| format!("reading {}: {e}", dir.display()))?;

    files
        .into_iter()
        .map(|path| {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| format!("reading {}: {e}", path.display()))?;
            toml::from_str::<FunctionSpec>(&content)
                .map_err(|e| format!("parsing {} as a function spec: {e}", path.display()))
        })
        .collect()
}

pub fn load_agent_specs(dir: &Path) -> Result<Vec<AgentSpec>, String> {
    let mut files = Vec::new();
    walk_toml_files(dir, &mut files).map_err(|e| format!("reading {}: {e}", dir.display()))?;

    files
        .into_iter()
        .map(|path| {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| format!("reading {}: {e}", path.display()))?;
            toml::from_str::<AgentSpec>(&content)
                .map_err(|e| format!("parsing {} as an agent spec: {e}", path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_function_spec_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("math");
        std::fs::create_dir_all(&sub).unwrap();
        let mut f = std::fs::File::create(sub.join("add.toml")).unwrap();
        write!(
            f,
            r#"
namespace = "math"
name = "add"
code = "def add(i, ctx): return i['a'] + i['b']"
input_schema = {{ type = "object" }}
"#
        )
        .unwrap();

        let specs = load_function_specs(dir.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].function_ref(), "math/add");
        assert!(!specs[0].requires_approval);
        assert!(specs[0].active);
    }

    #[test]
    fn missing_directory_yields_empty_list() {
        let specs = load_function_specs(Path::new("/nonexistent/path/xyz")).unwrap();
        assert!(specs.is_empty());
    }
}
