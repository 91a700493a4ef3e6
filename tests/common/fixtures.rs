use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_ellipse_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use panelcut::BoundingBox;
use std::io::Cursor;

const PAPER: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([0, 0, 0]);
const BORDER: u32 = 3;

/// Panel boxes of the 800x600 2x2 page, in page order (TL, TR, BL, BR)
pub const GRID_PANELS: [BoundingBox; 4] = [
    BoundingBox { x: 20, y: 20, width: 370, height: 270 },
    BoundingBox { x: 410, y: 20, width: 370, height: 270 },
    BoundingBox { x: 20, y: 310, width: 370, height: 270 },
    BoundingBox { x: 410, y: 310, width: 370, height: 270 },
];

/// Panel box of the 400x300 single-panel page
pub const SINGLE_PANEL: BoundingBox = BoundingBox { x: 40, y: 30, width: 320, height: 240 };

fn rect(bbox: &BoundingBox) -> Rect {
    Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.width, bbox.height)
}

/// Inked 3px frame with a small figure inside, like a drawn panel
fn draw_panel(page: &mut RgbImage, bbox: &BoundingBox) {
    draw_filled_rect_mut(page, rect(bbox), INK);
    let inner = BoundingBox::new(
        bbox.x + BORDER,
        bbox.y + BORDER,
        bbox.width - 2 * BORDER,
        bbox.height - 2 * BORDER,
    );
    draw_filled_rect_mut(page, rect(&inner), PAPER);

    // Some "art" well clear of the frame
    let figure = Rect::at((bbox.x + bbox.width / 3) as i32, (bbox.y + bbox.height / 3) as i32)
        .of_size(bbox.width / 4, bbox.height / 3);
    draw_filled_rect_mut(page, figure, Rgb([40, 40, 40]));
}

fn blank_page(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, PAPER)
}

/// 800x600 page with four equal panels in a 2x2 grid and 20px white gutters
pub fn grid_page() -> DynamicImage {
    let mut page = blank_page(800, 600);
    for bbox in &GRID_PANELS {
        draw_panel(&mut page, bbox);
    }
    DynamicImage::ImageRgb8(page)
}

/// 400x300 page with one framed panel
pub fn single_panel_page() -> DynamicImage {
    let mut page = blank_page(400, 300);
    draw_panel(&mut page, &SINGLE_PANEL);
    DynamicImage::ImageRgb8(page)
}

/// Flat page with nothing on it
pub fn uniform_page(width: u32, height: u32, level: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(image::GrayImage::from_pixel(width, height, Luma([level])))
}

/// Single framed panel with an outlined speech bubble inside it
pub fn bubble_page() -> DynamicImage {
    let mut page = blank_page(400, 300);
    draw_panel(&mut page, &SINGLE_PANEL);
    // Top-left of the panel, clear of the frame and the figure
    for r in 0..3 {
        draw_hollow_ellipse_mut(&mut page, (100, 75), 40 - r, 25 - r, INK);
    }
    DynamicImage::ImageRgb8(page)
}

/// Two dark panels split by a diagonal gutter, returned with their polygons
pub fn diagonal_page() -> (DynamicImage, [Vec<Point<i32>>; 2]) {
    let left = vec![
        Point::new(20, 20),
        Point::new(330, 20),
        Point::new(270, 380),
        Point::new(20, 380),
    ];
    let right = vec![
        Point::new(350, 20),
        Point::new(580, 20),
        Point::new(580, 380),
        Point::new(290, 380),
    ];
    let mut page = blank_page(600, 400);
    draw_polygon_mut(&mut page, &left, Rgb([60, 60, 60]));
    draw_polygon_mut(&mut page, &right, Rgb([60, 60, 60]));
    (DynamicImage::ImageRgb8(page), [left, right])
}

/// Black page with two light panels side by side
pub fn dark_gutter_page() -> (DynamicImage, [BoundingBox; 2]) {
    let panels = [
        BoundingBox::new(20, 20, 270, 360),
        BoundingBox::new(310, 20, 270, 360),
    ];
    let mut page = RgbImage::from_pixel(600, 400, INK);
    for bbox in &panels {
        draw_filled_rect_mut(&mut page, rect(bbox), Rgb([230, 230, 230]));
    }
    (DynamicImage::ImageRgb8(page), panels)
}

/// 2x2 grid surrounded by a 25px black scanner margin
pub fn scanned_grid_page() -> DynamicImage {
    let mut page = RgbImage::from_pixel(850, 650, INK);
    image::imageops::replace(&mut page, &grid_page().to_rgb8(), 25, 25);
    DynamicImage::ImageRgb8(page)
}

/// Frame of the 400x300 page whose single panel sits 8px from every edge
pub const NEAR_EDGE_FRAME: BoundingBox = BoundingBox { x: 8, y: 8, width: 384, height: 284 };

/// One framed panel filling almost the whole page, with a dark figure inside
pub fn near_edge_frame_page() -> DynamicImage {
    let mut page = blank_page(400, 300);
    draw_filled_rect_mut(&mut page, rect(&NEAR_EDGE_FRAME), INK);
    let inner = BoundingBox::new(11, 11, 378, 278);
    draw_filled_rect_mut(&mut page, rect(&inner), PAPER);
    draw_filled_rect_mut(&mut page, Rect::at(150, 100).of_size(96, 94), Rgb([40, 40, 40]));
    DynamicImage::ImageRgb8(page)
}

/// Two tall panels of the 800x600 page, 3px apart
pub const TIGHT_PANELS: [BoundingBox; 2] = [
    BoundingBox { x: 20, y: 20, width: 370, height: 560 },
    BoundingBox { x: 393, y: 20, width: 370, height: 560 },
];

/// Two framed panels with a 3px gutter between them
pub fn tight_gutter_page() -> DynamicImage {
    let mut page = blank_page(800, 600);
    for bbox in &TIGHT_PANELS {
        draw_panel(&mut page, bbox);
    }
    DynamicImage::ImageRgb8(page)
}

pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("PNG encoding failed");
    buf
}

pub fn encode_jpeg(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, 95);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .expect("JPEG encoding failed");
    buf
}

/// Every edge of `actual` within `tolerance` pixels of `expected`
pub fn assert_box_near(actual: &BoundingBox, expected: &BoundingBox, tolerance: i64) {
    let edges = |b: &BoundingBox| [b.x as i64, b.y as i64, b.right() as i64, b.bottom() as i64];
    let close = edges(actual)
        .iter()
        .zip(edges(expected))
        .all(|(a, e)| (a - e).abs() <= tolerance);
    assert!(close, "box {:?} not within {}px of {:?}", actual, tolerance, expected);
}

/// Smallest box covering all polygon vertices
pub fn polygon_bounds(points: &[Point<i32>]) -> BoundingBox {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);
    BoundingBox::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}
