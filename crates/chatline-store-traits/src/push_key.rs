//! Push-key generation.
//!
//! Push keys are 20 characters: 8 characters of millisecond timestamp followed
//! by 12 characters of randomness. The alphabet is in ASCII order, so keys
//! generated later always sort after keys generated earlier, including two
//! keys generated within the same millisecond (the random tail is incremented).

use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Stateful generator; one per store instance.
#[derive(Debug, Default)]
pub struct PushKeyGenerator {
    last_millis: u64,
    last_random: [u8; RANDOM_CHARS],
}

impl PushKeyGenerator {
    /// Create a generator with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next key for the given wall-clock millisecond timestamp.
    pub fn next_key(&mut self, now_millis: u64) -> String {
        // Clock skew must not reorder keys.
        let millis = now_millis.max(self.last_millis);
        if millis == self.last_millis && self.last_millis != 0 {
            self.increment_random();
        } else {
            let mut rng = rand::thread_rng();
            for slot in self.last_random.iter_mut() {
                *slot = rng.gen_range(0..64u8);
            }
        }
        self.last_millis = millis;

        let mut out = Vec::with_capacity(TIME_CHARS + RANDOM_CHARS);
        let mut ts = millis;
        let mut time_part = [0u8; TIME_CHARS];
        for slot in time_part.iter_mut().rev() {
            *slot = PUSH_CHARS[(ts % 64) as usize];
            ts /= 64;
        }
        out.extend_from_slice(&time_part);
        out.extend(self.last_random.iter().map(|i| PUSH_CHARS[*i as usize]));
        // The alphabet is pure ASCII.
        String::from_utf8_lossy(&out).into_owned()
    }

    fn increment_random(&mut self) {
        for slot in self.last_random.iter_mut().rev() {
            if *slot == 63 {
                *slot = 0;
            } else {
                *slot += 1;
                return;
            }
        }
    }
}
