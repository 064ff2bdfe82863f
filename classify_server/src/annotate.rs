//! Draw classification results onto frames.
//!
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

/// Height of the confidence bar relative to the frame height.
const BAR_HEIGHT_FRACTION: f32 = 0.03;

/// Draw a bar along the bottom edge whose width is proportional to `probability`.
///
/// The bar is green for confident predictions, yellow for uncertain ones and red otherwise.
pub fn draw_confidence_bar(frame: &mut RgbImage, probability: f32) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let probability = if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    };
    let bar_width = (width as f32 * probability).round() as u32;
    let bar_height = ((height as f32 * BAR_HEIGHT_FRACTION).ceil() as u32).clamp(1, height);
    if bar_width == 0 {
        return;
    }

    let rect = Rect::at(0, (height - bar_height) as i32).of_size(bar_width, bar_height);
    draw_filled_rect_mut(frame, rect, bar_color(probability));
}

fn bar_color(probability: f32) -> Rgb<u8> {
    match probability {
        p if p >= 0.5 => Rgb([0, 255, 0]),
        p if p >= 0.2 => Rgb([255, 255, 0]),
        _ => Rgb([255, 0, 0]),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bar_width_follows_probability() {
        let mut frame = RgbImage::new(100, 100);
        draw_confidence_bar(&mut frame, 0.75);

        assert_eq!(frame[(0, 99)], Rgb([0, 255, 0]));
        assert_eq!(frame[(74, 97)], Rgb([0, 255, 0]));
        assert_eq!(frame[(75, 99)], Rgb([0, 0, 0]));
        // Above the bar
        assert_eq!(frame[(0, 96)], Rgb([0, 0, 0]));
    }

    #[test]
    fn test_bar_color() {
        let mut frame = RgbImage::new(10, 10);
        draw_confidence_bar(&mut frame, 0.3);
        assert_eq!(frame[(0, 9)], Rgb([255, 255, 0]));

        let mut frame = RgbImage::new(10, 10);
        draw_confidence_bar(&mut frame, 0.1);
        assert_eq!(frame[(0, 9)], Rgb([255, 0, 0]));
    }

    #[test]
    fn test_nothing_drawn_for_zero() {
        let mut frame = RgbImage::new(10, 10);
        draw_confidence_bar(&mut frame, 0.0);
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
