use anyhow::bail;
use glam::Vec3;

#[derive(Copy, Clone, Debug)]
pub struct CameraSettings {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
}

#[derive(Copy, Clone, Debug)]
pub struct RenderOptions {
    pub camera: CameraSettings,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            camera: CameraSettings {
                position: Vec3::new(0.0, 0.0, 5.0),
                target: Vec3::ZERO,
                up: Vec3::Y,
                fov: 45.0,
            },
            width: 512,
            height: 512,
        }
    }
}

impl RenderOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("image size must be positive, got {}x{}", self.width, self.height);
        }
        if !(self.camera.fov > 0.0 && self.camera.fov < 180.0) {
            bail!("field of view must be in (0, 180) degrees, got {}", self.camera.fov);
        }
        Ok(())
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Parameters of the training schedule and the SD-tree.
#[derive(Copy, Clone, Debug)]
pub struct GuidingOptions {
    /// Samples per pixel of the first training pass.
    pub k0: u32,
    /// Spatial subdivision constant; a leaf splits once it holds more than
    /// `c * sqrt(k)` records.
    pub c: f32,
    /// Directional refinement constant, as a fraction of a leaf's energy.
    pub rho: f32,
    pub training_count: u32,
    pub record_batch_size: usize,
    /// Tile edge length in pixels.
    pub task_grid_size: u32,
    /// Samples per pixel of the final pass. Twice the last training pass when
    /// unset.
    pub rendering_spp: Option<u32>,
}

impl Default for GuidingOptions {
    fn default() -> Self {
        Self {
            k0: 4,
            c: 1000.0,
            rho: 0.01,
            training_count: 3,
            record_batch_size: 10000,
            task_grid_size: 32,
            rendering_spp: None,
        }
    }
}

impl GuidingOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.k0 < 1 {
            bail!("invalid k0 value: {}", self.k0);
        }
        if !(self.c >= 1.0) {
            bail!("invalid c value: {}", self.c);
        }
        if !(self.rho > 0.0 && self.rho <= 1.0) {
            bail!("invalid rho value: {}", self.rho);
        }
        if self.training_count < 1 {
            bail!("invalid training count: {}", self.training_count);
        }
        if self.record_batch_size < 1 {
            bail!("invalid record batch size: {}", self.record_batch_size);
        }
        if self.task_grid_size < 1 {
            bail!("invalid task grid size: {}", self.task_grid_size);
        }
        if self.rendering_spp == Some(0) {
            bail!("invalid rendering spp: 0");
        }
        Ok(())
    }

    /// Samples per pixel of each training pass: `k0`, doubling every round.
    pub fn training_spp(&self) -> impl Iterator<Item = u32> + use<> {
        let k0 = self.k0;
        (0..self.training_count).map(move |i| k0.saturating_mul(1 << i.min(31)))
    }

    pub fn final_spp(&self) -> u32 {
        self.rendering_spp.unwrap_or_else(|| {
            let last = self.training_spp().last().unwrap_or(self.k0);
            last.saturating_mul(2)
        })
    }

    /// Record count above which a spatial leaf is split after a pass at `spp`.
    pub fn record_count_threshold(&self, spp: u32) -> u32 {
        (self.c * (spp as f32).sqrt()) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GuidingOptions::default().validate().unwrap();
        RenderOptions::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let base = GuidingOptions::default();
        let cases = [
            GuidingOptions { k0: 0, ..base },
            GuidingOptions { c: 0.5, ..base },
            GuidingOptions { c: f32::NAN, ..base },
            GuidingOptions { rho: 0.0, ..base },
            GuidingOptions { rho: 1.5, ..base },
            GuidingOptions {
                training_count: 0,
                ..base
            },
            GuidingOptions {
                record_batch_size: 0,
                ..base
            },
            GuidingOptions {
                task_grid_size: 0,
                ..base
            },
            GuidingOptions {
                rendering_spp: Some(0),
                ..base
            },
        ];
        for options in cases {
            assert!(options.validate().is_err(), "{options:?}");
        }

        let err = GuidingOptions { rho: 2.0, ..base }.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid rho value: 2");
    }

    #[test]
    fn schedule_doubles_spp() {
        let options = GuidingOptions::default();
        assert_eq!(options.training_spp().collect::<Vec<_>>(), vec![4, 8, 16]);
        assert_eq!(options.final_spp(), 32);

        let options = GuidingOptions {
            rendering_spp: Some(7),
            ..options
        };
        assert_eq!(options.final_spp(), 7);
    }

    #[test]
    fn threshold_grows_with_sqrt_spp() {
        let options = GuidingOptions::default();
        assert_eq!(options.record_count_threshold(4), 2000);
        assert_eq!(options.record_count_threshold(16), 4000);
    }
}
