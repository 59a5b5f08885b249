use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::media::sink::RtpPacketizer;

pub const DEFAULT_MOUNT_PATH: &str = "/stream";

/// A named stream endpoint (e.g. `/stream`, `/camera1`).
///
/// Owns the [`RtpPacketizer`] for its stream: codec state plus the table of
/// clients that SETUP against this mount.
pub struct Mount {
    path: String,
    sink: RtpPacketizer,
}

impl Mount {
    pub fn new(path: &str, sink: RtpPacketizer) -> Self {
        Self {
            path: normalize_path(path),
            sink,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Client table and codec of this mount.
    pub fn sink(&self) -> &RtpPacketizer {
        &self.sink
    }

    /// Packetize one access unit and deliver it to every playing client.
    pub fn packetize_and_send(&self, frame: &[u8], timestamp_hns: i64) -> Result<usize> {
        self.sink.packetize_and_send(frame, timestamp_hns)
    }

    /// Provide SPS/PPS up front from the encoder's sequence header.
    pub fn set_parameter_sets(&self, sequence_header: &[u8]) -> Result<()> {
        self.sink.set_sequence_header(sequence_header)?;
        tracing::debug!(mount = %self.path, "parameter sets configured");
        Ok(())
    }

    /// RTP payload type from the underlying packetizer.
    pub fn payload_type(&self) -> u8 {
        self.sink.payload_type()
    }

    /// SDP media-level attributes (delegated to packetizer).
    pub fn sdp_attributes(&self) -> Vec<String> {
        self.sink.sdp_attributes()
    }

    /// `(next sequence, last RTP timestamp)` for the `RTP-Info` header.
    pub fn rtp_info(&self) -> (u16, u32) {
        self.sink.rtp_info()
    }
}

/// Registry of named mount points, keyed by path.
///
/// The first mount registered becomes the default: it serves any request
/// whose URL suffix doesn't match a registered mount, so a single-stream
/// server answers `rtsp://host/` and `rtsp://host/anything` alike.
#[derive(Clone, Default)]
pub struct MountRegistry {
    mounts: Arc<RwLock<HashMap<String, Arc<Mount>>>>,
    /// Path of the default (fallback) mount, used when no exact match is found.
    default_path: Arc<RwLock<Option<String>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mount. Replaces any existing mount at the same path.
    pub fn add(&self, path: &str, sink: RtpPacketizer) -> Arc<Mount> {
        let mount = Arc::new(Mount::new(path, sink));
        let path = mount.path().to_string();
        self.mounts.write().insert(path.clone(), mount.clone());

        let mut default = self.default_path.write();
        if default.is_none() {
            *default = Some(path.clone());
        }
        let is_default = default.as_deref() == Some(path.as_str());
        tracing::info!(path, is_default, "mount registered");
        mount
    }

    /// Designate a mount path as the default fallback.
    pub fn set_default(&self, path: &str) {
        *self.default_path.write() = Some(normalize_path(path));
    }

    /// Look up a mount by exact path.
    pub fn get(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.read().get(&normalize_path(path)).cloned()
    }

    pub fn default_mount(&self) -> Option<Arc<Mount>> {
        let default = self.default_path.read();
        default.as_ref().and_then(|p| self.mounts.read().get(p).cloned())
    }

    /// Resolve a mount from a request URL suffix (`/stream/track1`).
    ///
    /// Tries an exact path match first, then falls back to the default
    /// mount.
    pub fn resolve(&self, suffix: &str) -> Option<Arc<Mount>> {
        let path = extract_mount_path(suffix);
        self.get(path).or_else(|| self.default_mount())
    }

    pub fn all(&self) -> Vec<Arc<Mount>> {
        self.mounts.read().values().cloned().collect()
    }

    /// Drop `key` from every mount's client table (used during disconnect cleanup).
    pub fn remove_client_everywhere(&self, key: &str) {
        for mount in self.mounts.read().values() {
            mount.sink().remove_client(key);
        }
    }
}

/// Leading slash, no trailing slash.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Extract the mount path from a URL suffix.
///
/// `/stream/track1` → `/stream`
/// `/stream`        → `/stream`
/// `/`, ``, `*`     → `/`
pub fn extract_mount_path(suffix: &str) -> &str {
    let path = suffix.split(['?', '#']).next().unwrap_or(suffix);
    let path = if path.starts_with('/') { path } else { "/" };

    // Strip track suffix: /stream/track1 → /stream
    let path = match path.rfind("/track") {
        Some(pos) if path[pos + 6..].bytes().all(|b| b.is_ascii_digit()) => &path[..pos],
        _ => path,
    };
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PacketizationMode;

    fn sink() -> RtpPacketizer {
        RtpPacketizer::h264(PacketizationMode::NonInterleaved)
    }

    #[test]
    fn extract_path_plain() {
        assert_eq!(extract_mount_path("/stream"), "/stream");
    }

    #[test]
    fn extract_path_with_track() {
        assert_eq!(extract_mount_path("/stream/track1"), "/stream");
        assert_eq!(extract_mount_path("/camera1/track1"), "/camera1");
    }

    #[test]
    fn extract_path_root_forms() {
        assert_eq!(extract_mount_path(""), "/");
        assert_eq!(extract_mount_path("*"), "/");
        assert_eq!(extract_mount_path("/"), "/");
        assert_eq!(extract_mount_path("/track1"), "/");
    }

    #[test]
    fn extract_path_keeps_track_like_names() {
        assert_eq!(extract_mount_path("/tracker"), "/tracker");
        assert_eq!(extract_mount_path("/tracker/track2"), "/tracker");
    }

    #[test]
    fn extract_path_trailing_slash_and_query() {
        assert_eq!(extract_mount_path("/live/"), "/live");
        assert_eq!(extract_mount_path("/live?token=1"), "/live");
    }

    #[test]
    fn normalizes_registered_paths() {
        let registry = MountRegistry::new();
        let mount = registry.add("cam/", sink());
        assert_eq!(mount.path(), "/cam");
        assert!(registry.get("/cam").is_some());
    }

    #[test]
    fn first_mount_is_default() {
        let registry = MountRegistry::new();
        registry.add("/first", sink());
        registry.add("/second", sink());

        assert_eq!(registry.resolve("/second/track1").unwrap().path(), "/second");
        assert_eq!(registry.resolve("/unknown").unwrap().path(), "/first");
        assert_eq!(registry.resolve("").unwrap().path(), "/first");

        registry.set_default("/second");
        assert_eq!(registry.resolve("/unknown").unwrap().path(), "/second");
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        assert!(MountRegistry::new().resolve("/stream").is_none());
    }

    #[test]
    fn cleanup_removes_client_from_all_mounts() {
        let registry = MountRegistry::new();
        let a = registry.add("/a", sink());
        let b = registry.add("/b", sink());
        let handler: crate::transport::context::PacketHandler = Arc::new(|_: &[u8]| Ok(()));
        a.sink().add_transport_handler("s1", handler.clone(), 1);
        b.sink().add_transport_handler("s1", handler, 2);

        registry.remove_client_everywhere("s1");
        assert_eq!(a.sink().client_count(), 0);
        assert_eq!(b.sink().client_count(), 0);
    }

    #[test]
    fn parameter_sets_reach_sdp() {
        let mount = Mount::new("/stream", sink());
        let header = [0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80];
        mount.set_parameter_sets(&header).unwrap();
        let attrs = mount.sdp_attributes();
        assert!(attrs[1].contains("sprop-parameter-sets=Z0IAHg==,aM44gA=="));
        assert!(mount.set_parameter_sets(&[0, 0, 1, 0x65]).is_err());
    }
}
