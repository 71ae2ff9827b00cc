use glam::{Mat4, Vec3};

/// A perspective camera for 3D scenes.
///
/// Provides eye position, look-at target, and projection parameters. The
/// renderer uploads [`matrix`](Camera::matrix) to group 0 every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fovy: f32, // radians
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::ZERO,
            target: Vec3::Z,
            up: Vec3::Y,
            fovy: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Same as [`Camera::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the eye.
    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.eye = Vec3::new(x, y, z);
        self
    }

    /// Points the camera at a world position.
    pub fn looking_at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.target = Vec3::new(x, y, z);
        self
    }

    /// Vertical field of view in degrees.
    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fovy = fov_degrees.to_radians();
        self
    }

    /// Near and far clip distances.
    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Sets `aspect` to `width / height`. Zero sizes (minimized windows) are
    /// ignored.
    pub fn set_aspect_from(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Unit vector from the eye towards the target.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    /// Right-handed look-at matrix.
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Right-handed perspective with a 0..1 depth range.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy, self.aspect, self.near, self.far)
    }

    /// Projection × view, recomputed on every call.
    pub fn matrix(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Places the eye on a circle of `radius` around `center` at `height`
    /// above it, at `angle` radians from +Z, and looks at `center`.
    pub fn orbit(&mut self, center: Vec3, radius: f32, height: f32, angle: f32) {
        self.eye = center + Vec3::new(angle.sin() * radius, height, angle.cos() * radius);
        self.target = center;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn default_looks_down_positive_z() {
        let camera = Camera::default();
        assert_eq!(camera.eye, Vec3::ZERO);
        assert_eq!(camera.forward(), Vec3::Z);
        assert_eq!(camera.aspect, 1.0);
        assert_eq!((camera.near, camera.far), (0.1, 100.0));
    }

    #[test]
    fn matrix_is_projection_times_view() {
        let camera = Camera::new().at(1.0, 2.0, -3.0).looking_at(0.0, 0.5, 0.0);
        let expected = Mat4::perspective_rh(camera.fovy, 1.0, 0.1, 100.0)
            * Mat4::look_at_rh(camera.eye, camera.target, Vec3::Y);
        assert!(camera.matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn target_projects_to_screen_center() {
        let camera = Camera::new().at(0.0, 0.0, -5.0).looking_at(0.0, 0.0, 0.0);
        let clip = camera.matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-6 && ndc.y.abs() < 1e-6);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn aspect_ignores_zero_sizes() {
        let mut camera = Camera::default();
        camera.set_aspect_from(1920, 1080);
        assert!((camera.aspect - 16.0 / 9.0).abs() < 1e-6);
        camera.set_aspect_from(0, 1080);
        camera.set_aspect_from(1920, 0);
        assert!((camera.aspect - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn orbit_keeps_distance() {
        let mut camera = Camera::default();
        camera.orbit(Vec3::new(1.0, 0.0, 1.0), 4.0, 0.0, 1.2);
        assert!((camera.eye.distance(camera.target) - 4.0).abs() < 1e-5);
        assert_eq!(camera.target, Vec3::new(1.0, 0.0, 1.0));
    }
}
