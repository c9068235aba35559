use anyhow::Context;
use glam::Vec3;
use image::{Rgb, Rgb32FImage, RgbImage};

use crate::scheduler::Tile;

/// Mean linear RGB radiance per pixel, row major.
#[derive(Clone, Debug)]
pub struct Film {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Self {
        Film {
            width,
            height,
            pixels: vec![Vec3::ZERO; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Stores the pixels of `tile`, given row major within the tile.
    pub fn write_tile(&mut self, tile: &Tile, pixels: &[Vec3]) {
        assert_eq!(pixels.len(), tile.pixel_count());
        let tile_width = (tile.x1 - tile.x0) as usize;
        for (row, y) in (tile.y0..tile.y1).enumerate() {
            let start = (y * self.width + tile.x0) as usize;
            self.pixels[start..start + tile_width]
                .copy_from_slice(&pixels[row * tile_width..(row + 1) * tile_width]);
        }
    }

    pub fn average(&self) -> Vec3 {
        self.pixels.iter().sum::<Vec3>() / self.pixels.len().max(1) as f32
    }

    pub fn to_rgb32f(&self) -> anyhow::Result<Rgb32FImage> {
        let data: &[f32] = bytemuck::cast_slice(&self.pixels);
        Rgb32FImage::from_vec(self.width, self.height, data.to_vec())
            .context("film buffer does not match its dimensions")
    }

    pub fn to_srgb(&self, scale: f32) -> RgbImage {
        if let Some(i) = self.pixels.iter().position(|p| !p.is_finite()) {
            log::warn!("Pixel {i} had non-finite value");
        }

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let rgb = (self.pixel(x, y) * scale).max(Vec3::ZERO);
            let low = rgb * 12.92;
            let high = rgb.powf(1.0 / 2.4) * 1.055 - 0.055;
            let srgb = Vec3::select(rgb.cmplt(Vec3::splat(0.0031308)), low, high);
            Rgb((srgb * 255.0).as_u8vec3().to_array())
        })
    }
}
