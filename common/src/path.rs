//! Rutas del namespace: absolutas, separadas por '/'.

use crate::error::{DfsError, DfsResult};

pub const ROOT: &str = "/";

/// Normaliza una ruta: colapsa '/' repetidas y la '/' final.
/// Rechaza rutas relativas y los componentes "." y "..".
pub fn normalize(path: &str) -> DfsResult<String> {
    if !path.starts_with('/') {
        return Err(DfsError::InvalidPath(path.to_string()));
    }

    let mut out = String::with_capacity(path.len());
    for comp in path.split('/').filter(|c| !c.is_empty()) {
        if comp == "." || comp == ".." {
            return Err(DfsError::InvalidPath(path.to_string()));
        }
        out.push('/');
        out.push_str(comp);
    }

    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Componentes de una ruta ya normalizada ("/" no tiene componentes).
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Padre de una ruta normalizada; `None` para la raíz.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Último componente de la ruta.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Une padre e hijo, con el padre ya normalizado.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// `true` si `path` es `ancestor` o está debajo de él.
pub fn is_under(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT || path == ancestor {
        return true;
    }
    path.starts_with(ancestor) && path[ancestor.len()..].starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_slashes() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("//test///input/").unwrap(), "/test/input");
        assert_eq!(normalize("/a/b").unwrap(), "/a/b");
    }

    #[test]
    fn normalize_rejects_relative_and_dots() {
        assert!(matches!(normalize("a/b"), Err(DfsError::InvalidPath(_))));
        assert!(matches!(normalize("/a/../b"), Err(DfsError::InvalidPath(_))));
        assert!(matches!(normalize("/a/./b"), Err(DfsError::InvalidPath(_))));
        assert!(matches!(normalize(""), Err(DfsError::InvalidPath(_))));
    }

    #[test]
    fn parent_and_file_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/test"), Some("/"));
        assert_eq!(parent("/test/input/hello.txt"), Some("/test/input"));
        assert_eq!(file_name("/test/input/hello.txt"), "hello.txt");
        assert_eq!(join("/", "test"), "/test");
        assert_eq!(join("/test", "input"), "/test/input");
    }

    #[test]
    fn is_under_respects_component_boundaries() {
        assert!(is_under("/a/b", "/a"));
        assert!(is_under("/a", "/a"));
        assert!(is_under("/anything", "/"));
        assert!(!is_under("/ab", "/a"));
    }
}
