use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Framework, Language};

/// Dependencies that mark a package.json as a frontend app that cannot run to completion.
const FRONTEND_MARKERS: &[&str] = &["react", "next", "vue", "@angular/core", "svelte", "gatsby"];

pub fn package_json(files: &BTreeMap<String, String>) -> Option<Value> {
    let content = files.get("package.json")?;
    match serde_json::from_str(content) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Ignoring unparsable package.json: {}", e);
            None
        }
    }
}

/// Names of `dependencies` and `devDependencies`.
fn package_dependencies(package: &Value) -> Vec<String> {
    ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|section| package.get(section).and_then(Value::as_object))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

pub fn has_script(package: Option<&Value>, name: &str) -> bool {
    package
        .and_then(|p| p.get("scripts"))
        .and_then(|s| s.get(name))
        .is_some()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Guesses the language of a project meant for one-shot execution.
///
/// Returns `None` for frontend-only Node projects and for projects without
/// recognisable source files.
pub fn detect_language(files: &BTreeMap<String, String>) -> Option<Language> {
    if let Some(package) = package_json(files) {
        let deps = package_dependencies(&package);
        if deps.iter().any(|d| FRONTEND_MARKERS.contains(&d.as_str())) {
            debug!("package.json declares a frontend framework, not executable");
            return None;
        }
    }

    let has_python = files.keys().any(|f| f.ends_with(".py"));
    let has_node = files.keys().any(|f| {
        f.ends_with(".js") || f.ends_with(".mjs") || f.ends_with(".ts") || f == "package.json"
    });
    if has_python {
        Some(Language::Python)
    } else if has_node {
        Some(Language::Node)
    } else {
        None
    }
}

/// Guesses the web framework from requirements, package.json and imports.
pub fn detect_framework(files: &BTreeMap<String, String>) -> Option<Framework> {
    if let Some(requirements) = files.get("requirements.txt") {
        let requirements = requirements.to_lowercase();
        for framework in [
            Framework::FastApi,
            Framework::Flask,
            Framework::Django,
            Framework::Streamlit,
            Framework::Gradio,
        ] {
            if requirements.contains(framework.as_str()) {
                return Some(framework);
            }
        }
    }

    if let Some(package) = package_json(files) {
        let deps = package_dependencies(&package);
        let has = |name: &str| deps.iter().any(|d| d == name);
        if has("next") {
            return Some(Framework::NextJs);
        }
        if has("express") {
            return Some(Framework::Express);
        }
        if has("react") || has("react-scripts") {
            return Some(Framework::React);
        }
        if has("vue") || has("@vue/cli-service") {
            return Some(Framework::Vue);
        }
        if has("@angular/core") {
            return Some(Framework::Angular);
        }
    }

    for (name, content) in files {
        if !name.ends_with(".py") {
            continue;
        }
        if content.contains("import streamlit") || content.contains("from streamlit") {
            return Some(Framework::Streamlit);
        }
        if content.contains("import gradio") || content.contains("from gradio") {
            return Some(Framework::Gradio);
        }
    }
    None
}

/// Picks the file a one-shot execution runs.
pub fn find_entry_file(files: &BTreeMap<String, String>, language: Language) -> Option<String> {
    let preferred: &[&str] = match language {
        Language::Python => &["main.py", "app.py", "run.py"],
        Language::Node => &["index.js", "main.js", "app.js", "server.js"],
    };

    if language == Language::Node {
        let main = package_json(files)
            .and_then(|p| p.get("main").and_then(Value::as_str).map(str::to_string));
        if let Some(main) = main.filter(|m| files.contains_key(m)) {
            return Some(main);
        }
    }

    if let Some(found) = preferred.iter().find(|name| files.contains_key(**name)) {
        return Some(found.to_string());
    }

    files
        .keys()
        .find(|path| {
            let name = file_name(path);
            match language {
                Language::Python => {
                    name.ends_with(".py") && !name.starts_with("test_") && name != "__init__.py"
                }
                Language::Node => name.ends_with(".js") && !name.starts_with("test"),
            }
        })
        .cloned()
}

/// Main module of a Python web app; falls back to `main.py`.
pub fn find_python_main(files: &BTreeMap<String, String>) -> String {
    for name in ["main.py", "app.py", "server.py", "run.py"] {
        if files.contains_key(name) {
            return name.to_string();
        }
    }
    files
        .keys()
        .find(|path| path.ends_with(".py") && file_name(path) != "__init__.py")
        .cloned()
        .unwrap_or_else(|| "main.py".to_string())
}
