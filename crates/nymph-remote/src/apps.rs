//! Remote app helpers: the app list and the hypertext pane's link scheme.

/// Resource loaded for the top-level app listing.
pub const HOME_RESOURCE: &str = "apps.html";
/// Resource loaded when an app is started from a link.
pub const INDEX_RESOURCE: &str = "index.html";

/// Split the receiver's newline-delimited app list, skipping empty lines.
pub fn parse_app_list(raw: &str) -> Vec<String> {
    raw.split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// What a clicked link in the app pane asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppLink {
    /// `/start/<app>`
    Start(String),
    /// `/<app>/<command>`
    Message { app: String, command: String },
    Ignore,
}

impl AppLink {
    pub fn parse(path: &str) -> Self {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match parts.as_slice() {
            ["start", app, ..] => AppLink::Start(app.to_string()),
            [app, command, ..] => AppLink::Message {
                app: app.to_string(),
                command: command.to_string(),
            },
            _ => AppLink::Ignore,
        }
    }
}

/// Split a resource path into app id and file name: the directory part is
/// the app id (leading '/' stripped), the last segment is the file.  A bare
/// `/<file>` addresses the top-level resources with an empty app id.
pub fn resource_path(path: &str) -> (String, String) {
    let (dir, file) = path.rsplit_once('/').unwrap_or(("", path));
    let app = dir.strip_prefix('/').unwrap_or(dir);
    (app.to_string(), file.to_string())
}
