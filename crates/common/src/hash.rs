/// FNV-1a hasher used for bitwise state comparison.
///
/// Floats are hashed through their bit patterns so two states compare equal
/// only when every component is bitwise identical.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self::new()
    }
}

impl Fnv1a {
    pub fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325) // FNV offset basis
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn write_vec2(&mut self, v: glam::Vec2) {
        self.write_f32(v.x);
        self.write_f32(v.y);
    }

    pub fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_hash() {
        let mut a = Fnv1a::new();
        let mut b = Fnv1a::new();
        a.write_u64(42);
        a.write_f32(1.5);
        b.write_u64(42);
        b.write_f32(1.5);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn signed_zero_differs() {
        let mut a = Fnv1a::new();
        let mut b = Fnv1a::new();
        a.write_f32(0.0);
        b.write_f32(-0.0);
        assert_ne!(a.finish(), b.finish());
    }
}
