use glam::Vec3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        min: Vec3::INFINITY,
        max: Vec3::NEG_INFINITY,
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Bounds { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points
            .into_iter()
            .fold(Self::EMPTY, |bounds, p| Bounds {
                min: bounds.min.min(p),
                max: bounds.max.max(p),
            })
    }

    pub fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn diagonal(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Grows the box by `fraction` of its diagonal on every side.
    pub fn padded(&self, fraction: f32) -> Bounds {
        let pad = self.diagonal() * fraction;
        Bounds {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Splits the box at its midpoint along `axis`, returning the split
    /// coordinate and the lower and upper halves.
    pub fn split(&self, axis: usize) -> (f32, Bounds, Bounds) {
        let mid = 0.5 * (self.min[axis] + self.max[axis]);
        let mut low = *self;
        let mut high = *self;
        low.max[axis] = mid;
        high.min[axis] = mid;
        (mid, low, high)
    }
}
