//! Stateless "does this request look like scanner traffic" heuristic.

use std::collections::HashMap;

/// Garbage methods sent by vulnerability scanners to fingerprint servers.
const SCANNER_METHODS: &[&str] = &["BADMETHOD", "BADHTTPMETHOD", "BADDATA", "BADMTHD", "BDMTHD"];

/// Extensions of backup, dump and secret files nobody requests on purpose.
const SENSITIVE_EXTENSIONS: &[&str] = &[
    "env", "bak", "sql", "sqlite", "sqlite3", "db", "old", "save", "orig", "sqlitedb", "sqlite3db",
];

/// File names (lowercase) requested when hunting for leaked secrets or build metadata.
const SENSITIVE_FILES: &[&str] = &[
    ".env",
    ".htaccess",
    ".htpasswd",
    ".ds_store",
    ".npmrc",
    ".pypirc",
    ".bash_history",
    ".zsh_history",
    ".gitconfig",
    ".gitlab-ci.yml",
    ".travis.yml",
    ".dockerignore",
    "docker-compose.yml",
    "dockerfile",
    "cargo.lock",
    "composer.lock",
    "wp-config.php",
    "phpinfo.php",
    "web.config",
    "id_rsa",
    "id_dsa",
    "credentials",
];

/// Directory names (lowercase) that never appear in legitimate routes.
const SENSITIVE_DIRECTORIES: &[&str] = &[
    ".", "..", ".anydesk", ".aptitude", ".aws", ".azure", ".cache", ".circleci", ".config",
    ".dbus", ".docker", ".drush", ".gem", ".git", ".github", ".gnupg", ".gsutil", ".hg", ".idea",
    ".java", ".kube", ".lftp", ".minikube", ".npm", ".nvm", ".pki", ".snap", ".ssh",
    ".subversion", ".svn", ".tconn", ".thunderbird", ".tor", ".vagrant.d", ".vidalia", ".vim",
    ".vmware", ".vscode", "apache", "apache2", "grub", "system32", "tmp", "xampp", "cgi-bin",
    "%systemroot%",
];

/// Uppercased fragments of injection attempts found in query parameters.
const QUERY_KEYWORDS: &[&str] = &[
    "SELECT (CASE WHEN",
    "SELECT COUNT(",
    "SLEEP(",
    "WAITFOR DELAY",
    "SELECT LIKE(CHAR(",
    "INFORMATION_SCHEMA.COLUMNS",
    "INFORMATION_SCHEMA.TABLES",
    "MD5(",
    "DBMS_PIPE.RECEIVE_MESSAGE",
    "SYSIBM.SYSTABLES",
    "RANDOMBLOB(",
    "SELECT * FROM",
    "1'='1",
    "PG_SLEEP(",
    "UNION ALL SELECT",
    "../",
];

const MIN_QUERY_VALUE_LEN: usize = 5;
const MAX_QUERY_VALUE_LEN: usize = 1000;

pub fn is_scanner_method(method: &str) -> bool {
    SCANNER_METHODS.contains(&method)
}

/// Checks the file name (exact name, then extension) and every directory
/// segment of the path.
pub fn is_scanner_path(path: &str) -> bool {
    let normalized = path.to_ascii_lowercase();
    let segments: Vec<&str> = normalized.split('/').collect();

    if let Some(filename) = segments.last().filter(|name| !name.is_empty()) {
        if SENSITIVE_FILES.contains(filename) {
            return true;
        }
        if let Some((_, ext)) = filename.rsplit_once('.') {
            if !ext.is_empty() && SENSITIVE_EXTENSIONS.contains(&ext) {
                return true;
            }
        }
    }

    segments
        .iter()
        .any(|segment| SENSITIVE_DIRECTORIES.contains(segment))
}

pub fn is_scanner_query(query: &HashMap<String, String>) -> bool {
    query.values().any(|value| {
        if value.len() < MIN_QUERY_VALUE_LEN || value.len() > MAX_QUERY_VALUE_LEN {
            return false;
        }
        let upper = value.to_ascii_uppercase();
        QUERY_KEYWORDS.iter().any(|keyword| upper.contains(keyword))
    })
}

/// Method, path or query shaped like an automated vulnerability scan.
pub fn is_web_scanner(method: &str, path: &str, query: &HashMap<String, String>) -> bool {
    (!method.is_empty() && is_scanner_method(method))
        || (!path.is_empty() && is_scanner_path(path))
        || is_scanner_query(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(value: &str) -> HashMap<String, String> {
        HashMap::from([("q".to_string(), value.to_string())])
    }

    #[test]
    fn scanner_methods() {
        for method in SCANNER_METHODS {
            assert!(is_scanner_method(method));
        }
        for method in ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD", "PURGE"] {
            assert!(!is_scanner_method(method));
        }
    }

    #[test]
    fn scanner_paths() {
        for path in [
            "/.env",
            "/test/.env",
            "/test/.env.bak",
            "/.git/config",
            "/.aws/config",
            "/some/path/.git/test",
            "/some/path/.gitlab-ci.yml",
            "/some/path/.github/workflows/test.yml",
            "/.travis.yml",
            "/../example/",
            "/./test",
            "/Cargo.lock",
            "/System32/test",
            "/wp-config.php",
            "/backup/dump.SQL",
        ] {
            assert!(is_scanner_path(path), "{path} should look like a scan");
        }
    }

    #[test]
    fn ordinary_paths() {
        for path in [
            "/test/file.txt",
            "/some/route/to/file.json",
            "/en",
            "/",
            "/test/route",
            "/static/file.css",
            "/static/file.a461f56e.js",
            "/api/v1/users",
            "/uploads/image.png",
        ] {
            assert!(!is_scanner_path(path), "{path} should not look like a scan");
        }
    }

    #[test]
    fn scanner_queries() {
        for value in [
            "' or '1'='1",
            "1: SELECT * FROM users WHERE '1'='1'",
            "', information_schema.tables",
            "1' sleep(5)",
            "WAITFOR DELAY 1",
            "../etc/passwd",
        ] {
            assert!(is_scanner_query(&query(value)), "{value} should match");
        }
    }

    #[test]
    fn ordinary_queries() {
        for value in ["google.de", "some-string", "1", "", "1'", "abcd"] {
            assert!(!is_scanner_query(&query(value)), "{value} should not match");
        }
        assert!(!is_scanner_query(&HashMap::new()));
    }

    #[test]
    fn query_values_outside_length_window_are_ignored() {
        let long = format!("{}SLEEP(5)", "a".repeat(MAX_QUERY_VALUE_LEN));
        assert!(!is_scanner_query(&query(&long)));
    }

    #[test]
    fn combined_check() {
        let empty = HashMap::new();
        assert!(is_web_scanner("BADMETHOD", "/", &empty));
        assert!(is_web_scanner("GET", "/.env", &empty));
        assert!(is_web_scanner("GET", "/", &query("SELECT * FROM admin")));
        assert!(!is_web_scanner("POST", "graphql", &empty));
        assert!(!is_web_scanner("GET", "/public/index.html", &empty));
        assert!(!is_web_scanner("", "", &empty));
    }

    #[test]
    fn lists_have_no_duplicates() {
        for list in [SENSITIVE_FILES, SENSITIVE_DIRECTORIES, SENSITIVE_EXTENSIONS] {
            let mut sorted = list.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), list.len());
        }
    }
}
