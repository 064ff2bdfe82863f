//! Sensors module.
//!
use std::{cell::Cell, path::Path};

use bytes::Bytes;
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::Error;

/// Returns the next JPEG frame, or `None` if capturing failed.
pub type CaptureFn = Box<dyn Fn() -> Option<Bytes>>;

/// Get a capture function to a video device on a Linux machine.
///
/// Resolution and frame rate default to the highest values the device supports for `format`.
pub fn get_capture_fn(
    device_name: &str,
    format: &str,
    resolution: Option<(u32, u32)>,
    frame_rate: Option<(u32, u32)>,
) -> Result<CaptureFn, Error> {
    let mut cam = Camera::new(device_name)?;
    log_supported_formats(&cam, format);
    let format = format.as_bytes();

    log::info!("Using camera {}", device_name);

    let resolution = resolution
        .map(Ok)
        .unwrap_or_else(|| get_max_resolution(&cam, format))?;

    let frame_rate = frame_rate
        .map(Ok)
        .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

    log::info!(
        "Capturing {}x{} at {}/{} s per frame",
        resolution.0,
        resolution.1,
        frame_rate.0,
        frame_rate.1
    );

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })?;

    let callback = move || match cam.capture() {
        Ok(frame) => Some(Bytes::copy_from_slice(&frame[..])),
        Err(e) => {
            log::warn!("Capture failed: {e}");
            None
        }
    };
    Ok(Box::new(callback))
}

/// Get a capture function with the maximum resolution and frame rate of MJPG.
pub fn get_max_res_mjpg_capture_fn(device_name: &str) -> Result<CaptureFn, Error> {
    get_capture_fn(device_name, "MJPG", None, None)
}

/// Get a capture function cycling through the JPEG files of a directory.
///
/// Useful to run the live classification without a webcam.
pub fn get_replay_capture_fn(dir: impl AsRef<Path>) -> Result<CaptureFn, Error> {
    let dir = dir.as_ref();
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| {
                    ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg")
                })
        })
        .collect();
    paths.sort();

    let frames = paths
        .iter()
        .map(|path| std::fs::read(path).map(Bytes::from))
        .collect::<Result<Vec<_>, _>>()?;
    if frames.is_empty() {
        return Err(simple_error!("No JPEG files in {}", dir.display()).into());
    }
    log::info!("Replaying {} frames from {}", frames.len(), dir.display());

    let next = Cell::new(0);
    let callback = move || {
        let idx = next.get();
        next.set((idx + 1) % frames.len());
        Some(frames[idx].clone())
    };
    Ok(Box::new(callback))
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height) num_pixels)
            .map(|res| (res, res.0 * res.1))
            // Get the highest resolution in terms of number of pixels
            .max_by(|a, b| a.1.cmp(&b.1))
            // Extract width and height values
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Intervals are given as `(numerator, denominator)` seconds per frame, so the highest frame
/// rate is the smallest interval.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(numerator, _)| *numerator > 0)
            .max_by(|a, b| {
                let rate_a = a.1 as f64 / a.0 as f64;
                let rate_b = b.1 as f64 / b.0 as f64;
                rate_a.total_cmp(&rate_b)
            })
            .copied(),
        rscam::IntervalInfo::Stepwise {
            min,
            max: _,
            step: _,
        } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn get_cam_info_if_available() -> Result<(), Error> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                let format = b"MJPG";

                let resolutions = cam.resolutions(format)?;
                println!("Supported resolutions: {resolutions:?}");

                let selected_resolution = get_max_resolution(&cam, format)?;
                let frame_rate = get_max_frame_rate(&cam, format, selected_resolution)?;
                println!("Selected {selected_resolution:?} at {frame_rate:?}");
            }
        }

        Ok(())
    }

    #[test]
    fn test_replay_cycles_through_frames() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("b.jpg"), b"second")?;
        std::fs::write(dir.path().join("a.JPEG"), b"first")?;
        std::fs::write(dir.path().join("notes.txt"), b"skipped")?;

        let capture = get_replay_capture_fn(dir.path())?;
        assert_eq!(capture(), Some(Bytes::from_static(b"first")));
        assert_eq!(capture(), Some(Bytes::from_static(b"second")));
        assert_eq!(capture(), Some(Bytes::from_static(b"first")));

        Ok(())
    }

    #[test]
    fn test_replay_needs_frames() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        assert!(get_replay_capture_fn(dir.path()).is_err());
        Ok(())
    }
}
