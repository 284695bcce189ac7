//! Dockerfile generation — stack detection for sources shipped without one.
//!
//! Detection order is fixed: Node.js, Go, Python, Ruby, Rust. The first
//! matching marker file wins and every generated Dockerfile exposes the
//! app's configured port.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Node,
    Go,
    Python,
    Ruby,
    Rust,
}

impl Stack {
    pub fn name(&self) -> &'static str {
        match self {
            Stack::Node => "Node.js",
            Stack::Go => "Go",
            Stack::Python => "Python",
            Stack::Ruby => "Ruby",
            Stack::Rust => "Rust",
        }
    }
}

/// Detect the stack of a source tree by its marker files.
pub fn detect_stack(source_dir: &Path) -> Option<Stack> {
    if source_dir.join("package.json").exists() {
        return Some(Stack::Node);
    }
    if source_dir.join("go.mod").exists() {
        return Some(Stack::Go);
    }
    if source_dir.join("requirements.txt").exists() || source_dir.join("pyproject.toml").exists() {
        return Some(Stack::Python);
    }
    if source_dir.join("Gemfile").exists() {
        return Some(Stack::Ruby);
    }
    if source_dir.join("Cargo.toml").exists() {
        return Some(Stack::Rust);
    }
    None
}

/// Pick the Node install command from the lockfile present.
fn node_install_command(source_dir: &Path) -> &'static str {
    if source_dir.join("pnpm-lock.yaml").exists() {
        "RUN corepack enable && pnpm install --frozen-lockfile"
    } else if source_dir.join("yarn.lock").exists() {
        "RUN corepack enable && yarn install --frozen-lockfile"
    } else if source_dir.join("package-lock.json").exists() {
        "RUN npm ci"
    } else {
        "RUN npm install"
    }
}

/// Render a Dockerfile for the detected stack.
pub fn generate_dockerfile(stack: Stack, source_dir: &Path, port: u16) -> String {
    match stack {
        Stack::Node => format!(
            "FROM node:20-alpine\n\
             WORKDIR /app\n\
             COPY package*.json ./\n\
             {install}\n\
             COPY . .\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD [\"npm\", \"start\"]\n",
            install = node_install_command(source_dir),
            port = port,
        ),
        Stack::Go => format!(
            "FROM golang:1.22-alpine AS build\n\
             WORKDIR /src\n\
             COPY go.mod go.sum* ./\n\
             RUN go mod download\n\
             COPY . .\n\
             RUN CGO_ENABLED=0 go build -o /out/app .\n\
             \n\
             FROM alpine:3.20\n\
             WORKDIR /app\n\
             COPY --from=build /out/app .\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD [\"./app\"]\n",
            port = port,
        ),
        Stack::Python => format!(
            "FROM python:3.12-slim\n\
             WORKDIR /app\n\
             COPY requirements.txt* pyproject.toml* ./\n\
             RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; \
             else pip install --no-cache-dir .; fi\n\
             COPY . .\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD [\"python\", \"main.py\"]\n",
            port = port,
        ),
        Stack::Ruby => format!(
            "FROM ruby:3.3-slim\n\
             WORKDIR /app\n\
             COPY Gemfile Gemfile.lock* ./\n\
             RUN bundle install\n\
             COPY . .\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD [\"bundle\", \"exec\", \"ruby\", \"app.rb\"]\n",
            port = port,
        ),
        Stack::Rust => format!(
            "FROM rust:1.79-slim AS build\n\
             WORKDIR /src\n\
             COPY . .\n\
             RUN cargo build --release\n\
             \n\
             FROM debian:bookworm-slim\n\
             WORKDIR /app\n\
             COPY --from=build /src/target/release/ /app/bin/\n\
             RUN ln -s $(find /app/bin -maxdepth 1 -type f -executable | head -n1) /app/run\n\
             ENV PORT={port}\n\
             EXPOSE {port}\n\
             CMD [\"/app/run\"]\n",
            port = port,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_detection_order_prefers_node() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Cargo.toml");
        touch(dir.path(), "package.json");
        assert_eq!(detect_stack(dir.path()), Some(Stack::Node));
    }

    #[test]
    fn test_detects_each_stack() {
        for (marker, expected) in [
            ("package.json", Stack::Node),
            ("go.mod", Stack::Go),
            ("requirements.txt", Stack::Python),
            ("pyproject.toml", Stack::Python),
            ("Gemfile", Stack::Ruby),
            ("Cargo.toml", Stack::Rust),
        ] {
            let dir = tempfile::tempdir().unwrap();
            touch(dir.path(), marker);
            assert_eq!(detect_stack(dir.path()), Some(expected), "marker {}", marker);
        }
    }

    #[test]
    fn test_no_marker_no_stack() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "README.md");
        assert_eq!(detect_stack(dir.path()), None);
    }

    #[test]
    fn test_node_lockfile_selects_installer() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "package.json");
        assert!(generate_dockerfile(Stack::Node, dir.path(), 3000).contains("npm install"));

        touch(dir.path(), "package-lock.json");
        assert!(generate_dockerfile(Stack::Node, dir.path(), 3000).contains("npm ci"));

        touch(dir.path(), "yarn.lock");
        assert!(generate_dockerfile(Stack::Node, dir.path(), 3000).contains("yarn install"));

        touch(dir.path(), "pnpm-lock.yaml");
        assert!(generate_dockerfile(Stack::Node, dir.path(), 3000).contains("pnpm install"));
    }

    #[test]
    fn test_generated_dockerfiles_expose_port() {
        let dir = tempfile::tempdir().unwrap();
        for stack in [Stack::Node, Stack::Go, Stack::Python, Stack::Ruby, Stack::Rust] {
            let dockerfile = generate_dockerfile(stack, dir.path(), 8123);
            assert!(dockerfile.contains("EXPOSE 8123"), "{:?}", stack);
        }
    }

    #[test]
    fn test_go_and_rust_are_two_stage() {
        let dir = tempfile::tempdir().unwrap();
        for stack in [Stack::Go, Stack::Rust] {
            let dockerfile = generate_dockerfile(stack, dir.path(), 8080);
            assert!(dockerfile.contains("AS build"), "{:?}", stack);
            assert!(dockerfile.contains("COPY --from=build"), "{:?}", stack);
        }
    }
}
