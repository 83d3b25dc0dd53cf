//! Still-image video rendering.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use mixtape_models::encoding::VideoRenderConfig;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// JPEG quality for the prepared background frame.
const FRAME_JPEG_QUALITY: u8 = 95;

/// Decode `source`, convert to RGB and resize it to the render resolution.
///
/// Writes a JPEG to `dest`. Blocking; run on the blocking pool.
pub fn prepare_background(source: &Path, dest: &Path, config: &VideoRenderConfig) -> MediaResult<()> {
    if !source.exists() {
        return Err(MediaError::FileNotFound(source.to_path_buf()));
    }

    let img = image::open(source).map_err(|e| MediaError::invalid_image(source, e.to_string()))?;
    let resized = img
        .resize_exact(config.width, config.height, image::imageops::FilterType::Lanczos3)
        .to_rgb8();

    let file = std::fs::File::create(dest)?;
    let mut writer = std::io::BufWriter::new(file);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, FRAME_JPEG_QUALITY);
    encoder
        .encode_image(&resized)
        .map_err(|e| MediaError::internal(format!("failed to write background frame: {}", e)))?;
    drop(encoder);
    writer.flush()?;

    debug!(
        source = %source.display(),
        dest = %dest.display(),
        width = config.width,
        height = config.height,
        "Prepared background frame"
    );
    Ok(())
}

/// Build the FFmpeg command that loops `frame` over `audio`.
pub fn render_command(
    frame: &Path,
    audio: &Path,
    duration_ms: u64,
    config: &VideoRenderConfig,
    output: &Path,
) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input_args(["-loop".to_string(), "1".to_string(), "-framerate".to_string(), config.fps.to_string()])
        .input(frame)
        .input(audio)
        .output_args(["-map", "0:v:0", "-map", "1:a:0"])
        .output_args(config.to_ffmpeg_args())
        .duration(duration_ms as f64 / 1000.0)
        .output_arg("-shortest")
        .output_args(["-movflags", "+faststart"])
}

/// Render a video whose picture is `image` for the full `duration_ms` of
/// `audio`.
///
/// The resized frame is written into `work_dir`.
pub async fn render_still_video(
    runner: &FfmpegRunner,
    image: &Path,
    audio: &Path,
    duration_ms: u64,
    config: &VideoRenderConfig,
    work_dir: &Path,
    output: &Path,
) -> MediaResult<()> {
    if duration_ms == 0 {
        return Err(MediaError::EmptyRender);
    }
    if !audio.exists() {
        return Err(MediaError::FileNotFound(audio.to_path_buf()));
    }

    let frame: PathBuf = work_dir.join("bg_resized.jpg");
    {
        let image = image.to_path_buf();
        let frame = frame.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || prepare_background(&image, &frame, &config))
            .await
            .map_err(|e| MediaError::internal(format!("image task failed: {}", e)))??;
    }

    let cmd = render_command(&frame, audio, duration_ms, config, output);
    let total_ms = duration_ms as i64;

    runner
        .run_with_progress(&cmd, move |progress| {
            debug!(
                percent = progress.percentage(total_ms),
                eta_secs = ?progress.eta_seconds(total_ms),
                "Video render progress"
            );
        })
        .await?;

    info!(output = %output.display(), duration_ms, "Rendered video");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use tempfile::TempDir;

    #[test]
    fn test_render_command_layout() {
        let config = VideoRenderConfig::default();
        let cmd = render_command(
            Path::new("frame.jpg"),
            Path::new("mix.mp3"),
            129_000,
            &config,
            Path::new("out.mp4"),
        );
        let args = cmd.build_args();

        let loop_pos = args.iter().position(|a| a == "-loop").unwrap();
        let frame_pos = args.iter().position(|a| a == "frame.jpg").unwrap();
        assert!(loop_pos < frame_pos);
        assert!(args.windows(2).any(|w| w[0] == "-tune" && w[1] == "stillimage"));
        assert!(args.windows(2).any(|w| w[0] == "-pix_fmt" && w[1] == "yuv420p"));
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "129.000"));
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_prepare_background_resizes() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bg.png");
        image::RgbaImage::from_pixel(64, 48, image::Rgba([10, 20, 30, 255]))
            .save(&source)
            .unwrap();

        let dest = dir.path().join("frame.jpg");
        let config = VideoRenderConfig::default();
        prepare_background(&source, &dest, &config).unwrap();

        let frame = image::open(&dest).unwrap();
        assert_eq!(frame.width(), config.width);
        assert_eq!(frame.height(), config.height);
    }

    #[test]
    fn test_unreadable_image_is_input_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bg.jpg");
        std::fs::write(&source, b"not an image").unwrap();

        let err = prepare_background(&source, &dir.path().join("f.jpg"), &VideoRenderConfig::default())
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn test_zero_duration_rejected() {
        let dir = TempDir::new().unwrap();
        let err = render_still_video(
            &FfmpegRunner::new(),
            Path::new("bg.jpg"),
            Path::new("mix.mp3"),
            0,
            &VideoRenderConfig::default(),
            dir.path(),
            &dir.path().join("out.mp4"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::EmptyRender));
    }
}
