//! Shell commands run inside containers: dependency installs and app startup.

use log::{debug, warn};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use super::detect::{find_python_main, has_script, package_json};
use super::{Framework, Language};

/// Directory inside `/app` that holds pip packages installed for an execution.
pub const PYTHON_DEPS_DIR: &str = "/app/.deps";

/// Well-known third-party modules worth installing when a project imports them
/// without a requirements file. Standard library modules never appear here.
const KNOWN_PYTHON_PACKAGES: &[&str] = &[
    "flask", "django", "fastapi", "bottle", "tornado", "starlette", "requests", "httpx",
    "aiohttp", "urllib3", "pandas", "numpy", "scipy", "matplotlib", "seaborn", "plotly",
    "sqlalchemy", "pymongo", "redis", "psycopg2", "click", "typer", "pydantic", "attrs",
    "pytest", "bs4", "lxml", "pil", "yaml", "toml", "dotenv", "cryptography", "uvicorn",
    "gunicorn", "cv2", "sklearn",
];

/// Import name to pip distribution name, where they differ.
fn pip_name(module: &str) -> &str {
    match module {
        "bs4" => "beautifulsoup4",
        "cv2" => "opencv-python",
        "pil" => "pillow",
        "yaml" => "pyyaml",
        "dotenv" => "python-dotenv",
        "sklearn" => "scikit-learn",
        other => other,
    }
}

/// Single-quotes `value` for `sh -c`.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Third-party packages imported by the project's Python files.
pub fn detect_python_imports(files: &BTreeMap<String, String>) -> BTreeSet<String> {
    let pattern = match Regex::new(r"(?m)^\s*(?:from|import)\s+([A-Za-z_][A-Za-z0-9_]*)") {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Import scanner unavailable: {}", e);
            return BTreeSet::new();
        }
    };

    let mut packages = BTreeSet::new();
    for (name, content) in files {
        if !name.ends_with(".py") {
            continue;
        }
        for capture in pattern.captures_iter(content) {
            let module = capture[1].to_lowercase();
            if KNOWN_PYTHON_PACKAGES.contains(&module.as_str()) {
                packages.insert(pip_name(&module).to_string());
            }
        }
    }
    debug!("Detected python imports: {:?}", packages);
    packages
}

/// Install step for a one-shot execution, run in its own network-enabled container.
pub fn execution_install_command(
    files: &BTreeMap<String, String>,
    language: Language,
) -> Option<String> {
    match language {
        Language::Python => {
            if files.contains_key("requirements.txt") {
                return Some(format!(
                    "pip install -q --target {} -r requirements.txt",
                    PYTHON_DEPS_DIR
                ));
            }
            let packages = detect_python_imports(files);
            if packages.is_empty() {
                return None;
            }
            let packages: Vec<String> = packages.into_iter().collect();
            Some(format!(
                "pip install -q --target {} {}",
                PYTHON_DEPS_DIR,
                packages.join(" ")
            ))
        }
        Language::Node => files
            .contains_key("package.json")
            .then(|| "npm install --silent".to_string()),
    }
}

pub fn execution_run_command(entry_file: &str, language: Language) -> String {
    match language {
        Language::Python => format!("python {}", shell_quote(entry_file)),
        Language::Node => format!("node {}", shell_quote(entry_file)),
    }
}

/// Environment for an execution run container.
pub fn execution_env(language: Language) -> Vec<(String, String)> {
    match language {
        Language::Python => vec![
            ("PYTHONPATH".to_string(), PYTHON_DEPS_DIR.to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ],
        Language::Node => Vec::new(),
    }
}

fn module_name(file: &str) -> String {
    file.trim_end_matches(".py").replace('/', ".")
}

pub fn preview_install_command(
    files: &BTreeMap<String, String>,
    framework: Framework,
) -> Option<String> {
    match framework.language() {
        Language::Python => {
            if let Some(requirements) = files.get("requirements.txt") {
                let mut command = "pip install -q -r requirements.txt".to_string();
                if framework == Framework::FastApi
                    && !requirements.to_lowercase().contains("uvicorn")
                {
                    command.push_str(" uvicorn");
                }
                return Some(command);
            }
            match framework {
                Framework::FastApi => Some("pip install -q fastapi uvicorn".to_string()),
                Framework::Flask => Some("pip install -q flask".to_string()),
                Framework::Django => Some("pip install -q django".to_string()),
                Framework::Streamlit => Some("pip install -q streamlit".to_string()),
                Framework::Gradio => Some("pip install -q gradio".to_string()),
                _ => None,
            }
        }
        Language::Node => files
            .contains_key("package.json")
            .then(|| "npm install --silent".to_string()),
    }
}

pub fn preview_run_command(files: &BTreeMap<String, String>, framework: Framework) -> String {
    let package = package_json(files);
    let package = package.as_ref();
    match framework {
        Framework::FastApi => format!(
            "uvicorn {}:app --host 0.0.0.0 --port 8000",
            module_name(&find_python_main(files))
        ),
        Framework::Flask => format!(
            "flask --app {} run --host 0.0.0.0 --port 5000",
            module_name(&find_python_main(files))
        ),
        Framework::Django => "python manage.py runserver 0.0.0.0:8000".to_string(),
        Framework::Streamlit => format!(
            "streamlit run {} --server.address 0.0.0.0 --server.port 8501 --server.headless true",
            shell_quote(&find_python_main(files))
        ),
        Framework::Gradio => format!("python {}", shell_quote(&find_python_main(files))),
        Framework::React | Framework::NextJs => {
            if has_script(package, "dev") {
                "npm run dev -- --host 0.0.0.0".to_string()
            } else {
                "npm start".to_string()
            }
        }
        Framework::Vue | Framework::Angular => {
            if has_script(package, "dev") {
                "npm run dev -- --host 0.0.0.0".to_string()
            } else if has_script(package, "serve") {
                "npm run serve -- --host 0.0.0.0".to_string()
            } else if has_script(package, "start") {
                "npm start".to_string()
            } else {
                "npm run dev -- --host 0.0.0.0".to_string()
            }
        }
        Framework::Express => {
            if has_script(package, "start") {
                return "npm start".to_string();
            }
            if has_script(package, "dev") {
                return "npm run dev".to_string();
            }
            ["index.js", "server.js", "app.js"]
                .iter()
                .find(|name| files.contains_key(**name))
                .map(|name| format!("node {}", name))
                .unwrap_or_else(|| "npm start".to_string())
        }
    }
}

/// Full startup script of a preview container: install, then serve.
pub fn preview_script(files: &BTreeMap<String, String>, framework: Framework) -> String {
    let run = preview_run_command(files, framework);
    match preview_install_command(files, framework) {
        Some(install) => format!("{} && {}", install, run),
        None => run,
    }
}
