use super::Demuxer;
use crate::av::{MediaFormat, MediaKind, TrackDescriptor};
use log::{debug, warn};

/// A track chosen by [`select_track`] together with its derived descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSelection {
    pub index: usize,
    pub format: MediaFormat,
    pub descriptor: TrackDescriptor,
}

/// Picks the first track whose MIME type starts with `kind`'s prefix.
///
/// Tracks are scanned in enumeration order. Tracks whose format cannot be
/// read are skipped. Returns `None` when no track matches; whether that is an
/// error is up to the caller.
pub fn select_track(demuxer: &dyn Demuxer, kind: MediaKind) -> Option<TrackSelection> {
    let prefix = kind.mime_prefix();
    for index in 0..demuxer.track_count() {
        let format = match demuxer.track_format(index) {
            Ok(format) => format,
            Err(e) => {
                warn!("skipping track {}: {}", index, e);
                continue;
            }
        };
        if format.mime.starts_with(prefix) {
            debug!("selected track {} ({}): {:?}", index, format.mime, format);
            return Some(TrackSelection {
                index,
                descriptor: TrackDescriptor::from_format(index, &format),
                format,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::Packet;
    use crate::format::SeekMode;
    use crate::{FrameStepError, Result};

    struct TrackList(Vec<Option<MediaFormat>>);

    #[async_trait::async_trait]
    impl Demuxer for TrackList {
        fn track_count(&self) -> usize {
            self.0.len()
        }

        fn track_format(&self, index: usize) -> Result<MediaFormat> {
            self.0[index]
                .clone()
                .ok_or_else(|| FrameStepError::InvalidData("unreadable track".into()))
        }

        fn select_track(&mut self, _index: usize) -> Result<()> {
            Ok(())
        }

        async fn read_sample(&mut self) -> Result<Option<Packet>> {
            Ok(None)
        }

        fn advance(&mut self) -> bool {
            false
        }

        fn seek(&mut self, _offset_us: i64, _mode: SeekMode) -> Result<()> {
            Ok(())
        }

        fn release(&mut self) {}
    }

    #[test]
    fn test_selects_first_match_in_order() {
        let demuxer = TrackList(vec![
            Some(MediaFormat::new("audio/mp4a-latm")),
            Some(MediaFormat::new("video/avc")),
            Some(MediaFormat::new("video/hevc")),
            Some(MediaFormat::new("audio/opus")),
        ]);

        let video = select_track(&demuxer, MediaKind::Video).unwrap();
        assert_eq!(video.index, 1);
        assert_eq!(video.descriptor.media_type, "video/avc");

        let audio = select_track(&demuxer, MediaKind::Audio).unwrap();
        assert_eq!(audio.index, 0);
    }

    #[test]
    fn test_missing_kind_is_none() {
        let demuxer = TrackList(vec![Some(MediaFormat::new("video/avc"))]);
        assert!(select_track(&demuxer, MediaKind::Audio).is_none());
        assert!(select_track(&TrackList(vec![]), MediaKind::Video).is_none());
    }

    #[test]
    fn test_unreadable_track_is_skipped() {
        let demuxer = TrackList(vec![None, Some(MediaFormat::new("video/vp9"))]);
        assert_eq!(select_track(&demuxer, MediaKind::Video).unwrap().index, 1);
    }
}
