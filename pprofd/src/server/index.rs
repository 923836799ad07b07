//! Index page

use std::fmt::Write as _;

use crate::profiles::ProfileRegistry;

/// Placeholder replaced with one table row per named profile
pub const PROFILES_PLACEHOLDER: &str = "{{profiles}}";

pub const DEFAULT_INDEX_TEMPLATE: &str = r#"<html>
<head>
<title>pprofd</title>
</head>
<body>
<b>pprofd profiling interface</b><br>
<br>
<b>CPU profile:</b><br>
<table>
<tr><td align=left>plain text<td>(<a href="profile?seconds=5">5s</a> <a href="profile?seconds=15">15s</a> <a href="profile?seconds=30">30s</a> <a href="profile?seconds=60">1min</a>)
<tr><td align=left>binary<td>(<a href="profile?seconds=5&binary=true">5s</a> <a href="profile?seconds=15&binary=true">15s</a> <a href="profile?seconds=30&binary=true">30s</a> <a href="profile?seconds=60&binary=true">1min</a>)
</table>
<br>
<b>Execution trace:</b><br>
<table>
<tr><td align=left>binary<td>(<a href="trace?seconds=0.1">0.1s</a> <a href="trace?seconds=0.5">0.5s</a> <a href="trace?seconds=1.0">1.0s</a>)
</table>
<br>
<b>Available profiles:</b><br>
<table>
{{profiles}}
<tr><td align=left><a href="cmdline">command line</a>
</table>
</body>
</html>
"#;

/// Fill the template's profile table
///
/// Counts are read at render time, so this may touch `/proc`.
#[must_use]
pub fn render_index(template: &str, profiles: &ProfileRegistry) -> String {
    let mut rows = String::new();
    for profile in profiles.iter() {
        let name = escape_html(profile.name());
        let _ = writeln!(
            rows,
            "<tr><td align=left><a href=\"{name}?debug=1\">{name}</a><td> ({})",
            profile.count()
        );
    }
    template.replace(PROFILES_PLACEHOLDER, rows.trim_end())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
