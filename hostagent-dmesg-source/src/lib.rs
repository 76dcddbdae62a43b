//! Command selection for the kernel log source.
//!
//! §6 of the spec names the canonical three-attempt chain verbatim: the modern `-w` follow
//! flag, the `-W` alternate for kernels where `-w` behaves differently, and a `journalctl`
//! fallback for hosts whose `dmesg` predates `--since` support (util-linux < 2.37, detected by
//! parsing `dmesg --version`). Each attempt is guarded by `|| true` so an unsupported flag (or
//! a missing binary) falls through to the next attempt instead of aborting the pipeline.

use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use hostagent_core::dedup::DeduperConfig;
use hostagent_core::error::Error;
use hostagent_core::log_streamer::LogStreamer;
use hostagent_log_parsers::IsoDmesgParser;

lazy_static! {
    // `dmesg from util-linux 2.37.2`
    static ref VERSION_RE: Regex = Regex::new(r"util-linux\s+(\d+)\.(\d+)").unwrap();
}

/// Parses a util-linux version pair out of `dmesg --version` output. Returns `None` if the
/// output doesn't match the expected shape, which the caller treats the same as "too old".
fn parse_util_linux_version(version_output: &str) -> Option<(u32, u32)> {
    let caps = VERSION_RE.captures(version_output)?;
    let major: u32 = caps[1].parse().ok()?;
    let minor: u32 = caps[2].parse().ok()?;
    Some((major, minor))
}

/// Below this version, `dmesg --since` is unsupported and the `journalctl` fallback is needed.
const MIN_SINCE_VERSION: (u32, u32) = (2, 37);

fn dmesg_attempt(follow_flag: &str) -> Vec<String> {
    vec![
        "dmesg".into(),
        "--time-format=iso".into(),
        "--nopager".into(),
        "--buffer-size".into(),
        "163920".into(),
        follow_flag.into(),
    ]
}

fn or_true() -> Vec<String> {
    vec!["||".into(), "true".into()]
}

/// Builds the ordered command pipeline for the kernel log source, given the text of
/// `dmesg --version` (or an empty string, if the probe itself failed).
///
/// Always tries `-w` then `-W`, each guarded by `|| true`; appends the `journalctl` fallback
/// only when this host's `dmesg` is old enough that `--since` (and therefore reliable
/// follow-mode) is not supported.
pub fn select_dmesg_commands(version_output: &str) -> Vec<Vec<String>> {
    let supports_since = parse_util_linux_version(version_output)
        .map(|version| version >= MIN_SINCE_VERSION)
        .unwrap_or(false);

    let mut commands = vec![
        dmesg_attempt("-w"),
        or_true(),
        dmesg_attempt("-W"),
    ];

    if !supports_since {
        commands.push(or_true());
        commands.push(vec![
            "journalctl".into(),
            "-qk".into(),
            "-o".into(),
            "short-iso".into(),
            "--no-pager".into(),
            "--since".into(),
            "1 hour ago".into(),
            "-f".into(),
        ]);
    }

    commands
}

/// Probes the local `dmesg --version` and opens a [`LogStreamer`] over the resulting fallback
/// chain, parsed with [`IsoDmesgParser`].
pub async fn open_kernel_log_stream(cancel: CancellationToken) -> Result<LogStreamer, Error> {
    let version_output = probe_dmesg_version().await.unwrap_or_default();
    let commands = select_dmesg_commands(&version_output);
    LogStreamer::open(
        commands,
        std::sync::Arc::new(IsoDmesgParser),
        DeduperConfig::default(),
        cancel,
    )
    .await
}

async fn probe_dmesg_version() -> Option<String> {
    let output = tokio::process::Command::new("dmesg")
        .arg("--version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modern_util_linux_skips_journalctl_fallback() {
        let commands = select_dmesg_commands("dmesg from util-linux 2.38.1");
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            vec!["dmesg", "--time-format=iso", "--nopager", "--buffer-size", "163920", "-w"]
        );
        assert_eq!(commands[1], vec!["||", "true"]);
        assert_eq!(
            commands[2],
            vec!["dmesg", "--time-format=iso", "--nopager", "--buffer-size", "163920", "-W"]
        );
    }

    #[test]
    fn pre_2_37_appends_journalctl_fallback() {
        let commands = select_dmesg_commands("dmesg from util-linux 2.34");
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[3], vec!["||", "true"]);
        assert_eq!(
            commands[4],
            vec![
                "journalctl", "-qk", "-o", "short-iso", "--no-pager", "--since", "1 hour ago",
                "-f"
            ]
        );
    }

    #[test]
    fn unparseable_version_is_treated_as_too_old() {
        let commands = select_dmesg_commands("");
        assert_eq!(commands.len(), 5);
        assert!(commands.last().unwrap().contains(&"journalctl".to_string()));
    }

    #[test]
    fn both_dmesg_attempts_are_always_present_in_order() {
        let commands = select_dmesg_commands("dmesg from util-linux 2.38.1");
        assert!(commands[0].contains(&"-w".to_string()));
        assert!(commands[2].contains(&"-W".to_string()));
    }
}
