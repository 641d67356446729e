//! Transport configuration (§6), built the same way `myra_uring::Builder`
//! builds ring setup parameters: a plain struct assembled through a
//! `&mut self -> &mut Self` builder.

/// Which of the three ring operating modes (§4.3) the driver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Explicit `enter` after each flush.
    Direct,
    /// Kernel-side submission-queue polling.
    Sqpoll,
    /// Token-tagged completion routing, required for multishot/linked ops.
    ///
    /// *(added)* Every mode tags submissions with a token (§4.3's "added"
    /// note); `Token` additionally permits multishot accept/recv.
    Token,
}

/// Fixed-buffer registration request (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct FixedBuffers {
    pub count: u32,
    pub size: u32,
}

/// Provided-buffer-ring registration request (§4.2).
#[derive(Debug, Clone, Copy)]
pub struct BufferRing {
    pub group_id: u16,
    pub count: u16,
    pub size: u32,
}

/// CPU affinity for the owning thread and, if sqpoll is enabled, the
/// kernel's poll thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pinning {
    pub server_core: Option<u32>,
    pub client_core: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) ring_size: u32,
    pub(crate) mode: Mode,
    pub(crate) sqpoll_idle_ms: u32,
    pub(crate) sqpoll_cpu: Option<u32>,
    pub(crate) fixed_buffers: Option<FixedBuffers>,
    pub(crate) buffer_ring: Option<BufferRing>,
    pub(crate) max_frame_bytes: u32,
    pub(crate) send_watermark_bytes: usize,
    pub(crate) pinning: Pinning,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ring_size: 256,
            mode: Mode::Direct,
            sqpoll_idle_ms: 100,
            sqpoll_cpu: None,
            fixed_buffers: None,
            buffer_ring: None,
            max_frame_bytes: 16 * 1024 * 1024,
            send_watermark_bytes: 1024 * 1024,
            pinning: Pinning::default(),
        }
    }
}

impl Config {
    pub fn builder() -> Builder {
        Builder(Config::default())
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn sqpoll_idle_ms(&self) -> u32 {
        self.sqpoll_idle_ms
    }

    pub fn sqpoll_cpu(&self) -> Option<u32> {
        self.sqpoll_cpu
    }

    pub fn fixed_buffers(&self) -> Option<FixedBuffers> {
        self.fixed_buffers
    }

    pub fn buffer_ring(&self) -> Option<BufferRing> {
        self.buffer_ring
    }

    pub fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes
    }

    pub fn send_watermark_bytes(&self) -> usize {
        self.send_watermark_bytes
    }

    pub fn pinning(&self) -> Pinning {
        self.pinning
    }
}

/// Builds a [`Config`]. Mirrors `myra_uring::Builder`'s `&mut self -> &mut
/// Self` chaining shape.
#[derive(Clone, Default)]
pub struct Builder(Config);

impl Builder {
    pub fn ring_size(&mut self, n: u32) -> &mut Self {
        self.0.ring_size = n;
        self
    }

    pub fn mode(&mut self, mode: Mode) -> &mut Self {
        self.0.mode = mode;
        self
    }

    pub fn sqpoll_idle_ms(&mut self, ms: u32) -> &mut Self {
        self.0.sqpoll_idle_ms = ms;
        self
    }

    pub fn sqpoll_cpu(&mut self, cpu: u32) -> &mut Self {
        self.0.sqpoll_cpu = Some(cpu);
        self
    }

    pub fn fixed_buffers(&mut self, count: u32, size: u32) -> &mut Self {
        self.0.fixed_buffers = Some(FixedBuffers { count, size });
        self
    }

    pub fn buffer_ring(&mut self, group_id: u16, count: u16, size: u32) -> &mut Self {
        self.0.buffer_ring = Some(BufferRing {
            group_id,
            count,
            size,
        });
        self
    }

    pub fn max_frame_bytes(&mut self, n: u32) -> &mut Self {
        self.0.max_frame_bytes = n;
        self
    }

    pub fn send_watermark_bytes(&mut self, n: usize) -> &mut Self {
        self.0.send_watermark_bytes = n;
        self
    }

    pub fn pinning(&mut self, pinning: Pinning) -> &mut Self {
        self.0.pinning = pinning;
        self
    }

    pub fn build(&self) -> Config {
        self.0.clone()
    }
}
