use dau_gateway_models::settings::Ptp as PtpSettings;
use std::{
    fmt::Write as _,
    io,
    net::IpAddr,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;

/// Renders the daemon configuration for the given unicast destinations.
pub fn render(settings: &PtpSettings, destinations: &[IpAddr]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# generated by dau-gateway; manual edits are overwritten");
    let _ = writeln!(out, "[global]");
    let _ = writeln!(out, "domainNumber {}", settings.domain_number);
    for option in &settings.extra_global_options {
        let option = option.trim();
        if !option.is_empty() {
            let _ = writeln!(out, "{option}");
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[unicast_master_table]");
    let _ = writeln!(out, "table_id 1");
    let _ = writeln!(out, "logQueryInterval {}", settings.log_query_interval);

    let mut sorted = destinations.to_vec();
    sorted.sort();
    sorted.dedup();
    for address in sorted {
        match address {
            IpAddr::V4(v4) => {
                let _ = writeln!(out, "UDPv4 {v4}");
            }
            IpAddr::V6(v6) => {
                let _ = writeln!(out, "UDPv6 {v6}");
            }
        }
    }
    out
}

/// Writes the configuration file, skipping writes that would not change it.
pub struct ConfigWriter {
    path: PathBuf,
    last: Mutex<Option<String>>,
}

impl ConfigWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` when the file content changed.
    pub async fn write(&self, contents: String) -> io::Result<bool> {
        let mut last = self.last.lock().await;
        if last.as_deref() == Some(contents.as_str()) {
            return Ok(false);
        }
        write_atomically(&self.path, contents.as_bytes()).await?;
        *last = Some(contents);
        Ok(true)
    }
}

/// Temporary sibling file plus rename, so readers never see a partial file.
pub async fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sorted_destinations() {
        let settings = PtpSettings {
            domain_number: 24,
            extra_global_options: vec!["unicast_listen 1".into(), " ".into()],
            ..Default::default()
        };
        let rendered = render(
            &settings,
            &[
                "10.0.0.20".parse().unwrap(),
                "10.0.0.3".parse().unwrap(),
                "10.0.0.20".parse().unwrap(),
            ],
        );
        let expected = "\
# generated by dau-gateway; manual edits are overwritten
[global]
domainNumber 24
unicast_listen 1

[unicast_master_table]
table_id 1
logQueryInterval 2
UDPv4 10.0.0.3
UDPv4 10.0.0.20
";
        assert_eq!(rendered, expected);
    }

    #[tokio::test]
    async fn unchanged_content_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ptp.conf");
        let writer = ConfigWriter::new(&path);

        assert!(writer.write("a\n".into()).await.unwrap());
        assert!(!writer.write("a\n".into()).await.unwrap());
        assert!(writer.write("b\n".into()).await.unwrap());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "b\n");
        assert!(!path.with_extension("conf.tmp").exists());
    }
}
