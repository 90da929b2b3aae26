#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use deimos::prelude::*;

/// Everything the mock device was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    CreateTexture(TextureCreateInfo),
    DestroyTexture(TextureHandle),
    OpenList {
        queue: QueueKind,
        list: CommandList,
    },
    Transition {
        list: CommandList,
        texture: TextureHandle,
        from: ResourceState,
        to: ResourceState,
    },
    Submit {
        queue: QueueKind,
        lists: Vec<CommandList>,
    },
    Signal {
        queue: QueueKind,
        fence: FencePrimitive,
        value: u64,
    },
    Wait {
        queue: QueueKind,
        fence: FencePrimitive,
        value: u64,
    },
}

/// Headless device recording every call, for automated tests.
#[derive(Debug, Default)]
pub struct MockDevice {
    next_handle: AtomicU64,
    fail_texture_creation: AtomicBool,
    ops: Mutex<Vec<DeviceOp>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Make every subsequent texture creation fail, to exercise the stale-resource path.
    pub fn fail_texture_creation(&self, fail: bool) {
        self.fail_texture_creation.store(fail, Ordering::SeqCst);
    }

    pub fn created_textures(&self) -> Vec<TextureCreateInfo> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                DeviceOp::CreateTexture(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: DeviceOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn fresh_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl RenderDevice for MockDevice {
    fn create_texture(&self, info: &TextureCreateInfo) -> Result<TextureHandle> {
        if self.fail_texture_creation.load(Ordering::SeqCst) {
            anyhow::bail!("mock device out of memory");
        }
        let handle = TextureHandle(self.fresh_handle());
        self.record(DeviceOp::CreateTexture(info.clone()));
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.record(DeviceOp::DestroyTexture(texture));
    }

    fn back_buffer(&self) -> TextureHandle {
        TextureHandle(u64::MAX)
    }

    fn create_fence(&self) -> Result<FencePrimitive> {
        Ok(FencePrimitive(self.fresh_handle()))
    }

    fn open_command_list(&self, queue: QueueKind) -> Result<CommandList> {
        let list = CommandList(self.fresh_handle());
        self.record(DeviceOp::OpenList { queue, list });
        Ok(list)
    }

    fn transition(
        &self,
        cmd: CommandList,
        texture: TextureHandle,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<()> {
        self.record(DeviceOp::Transition {
            list: cmd,
            texture,
            from,
            to,
        });
        Ok(())
    }

    fn submit(&self, queue: QueueKind, lists: &[CommandList]) -> Result<()> {
        self.record(DeviceOp::Submit {
            queue,
            lists: lists.to_vec(),
        });
        Ok(())
    }

    fn signal(&self, queue: QueueKind, fence: FencePrimitive, value: u64) -> Result<()> {
        self.record(DeviceOp::Signal {
            queue,
            fence,
            value,
        });
        Ok(())
    }

    fn wait(&self, queue: QueueKind, fence: FencePrimitive, value: u64) -> Result<()> {
        self.record(DeviceOp::Wait {
            queue,
            fence,
            value,
        });
        Ok(())
    }
}

/// Install the test logger so permissive-parse warnings show up with RUST_LOG set.
pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Config with distinct render and output resolutions so sizing rules are observable.
pub fn test_config() -> CompositorConfig {
    CompositorConfig {
        render_width: 1600,
        render_height: 900,
        output_width: 1920,
        output_height: 1080,
        render_to_output: false,
        upscaler: UpscalerMode::Off,
    }
}

/// Task fixture that records which entry points were invoked.
pub struct ProbeTask {
    pub log: Arc<Mutex<Vec<String>>>,
    pub compute_on_sync: bool,
}

impl CompositorTask for ProbeTask {
    fn initialize(&mut self, pass: &PassDescriptor, _ctx: &mut TaskContext) -> Result<Vec<AsyncSubtask>> {
        self.log.lock().unwrap().push(format!("initialize {}", pass.name));
        Ok(Vec::new())
    }

    fn resize(&mut self, pass: &PassDescriptor, _ctx: &TaskContext) -> Result<()> {
        self.log.lock().unwrap().push(format!("resize {}", pass.name));
        Ok(())
    }

    fn run(&mut self, _ctx: &FrameContext, _cmd: CommandList, pass: &ResolvedPass) -> Result<()> {
        self.log.lock().unwrap().push(format!("run {}", pass.name));
        Ok(())
    }

    fn run_compute(&mut self, _ctx: &FrameContext, _cmd: CommandList, pass: &ResolvedPass) -> Result<()> {
        self.log.lock().unwrap().push(format!("run_compute {}", pass.name));
        Ok(())
    }

    fn writes_sync_compute_commands(&self) -> bool {
        self.compute_on_sync
    }
}

/// Task fixture that registers one worker-thread subtask per pass.
pub struct WorkerTask {
    pub log: Arc<Mutex<Vec<String>>>,
    pub force_order: bool,
}

impl CompositorTask for WorkerTask {
    fn initialize(&mut self, pass: &PassDescriptor, _ctx: &mut TaskContext) -> Result<Vec<AsyncSubtask>> {
        let log = self.log.clone();
        let name = pass.name.clone();
        let subtask = AsyncSubtask {
            name: format!("{}.worker", pass.name),
            record: Box::new(move |ctx: &FrameContext| {
                let cmd = ctx.device.open_command_list(QueueKind::Async)?;
                let (tx, rx) = futures::channel::oneshot::channel();
                let log = log.clone();
                let name = name.clone();
                std::thread::spawn(move || {
                    log.lock().unwrap().push(format!("recorded {}", name));
                    let _ = tx.send(cmd);
                });
                Ok(SubtaskCommands::Deferred(rx))
            }),
        };
        Ok(vec![subtask])
    }

    fn run(&mut self, _ctx: &FrameContext, _cmd: CommandList, _pass: &ResolvedPass) -> Result<()> {
        Ok(())
    }

    fn writes_sync_commands(&self) -> bool {
        false
    }

    fn force_task_order(&self) -> bool {
        self.force_order
    }
}

/// Shorthand for building synthetic resolved passes in planner and scheduler tests.
pub fn pass(
    name: &str,
    queue: QueueKind,
    inputs: &[(&str, SlotFlags)],
    targets: &[(&str, SlotFlags)],
) -> ResolvedPass {
    let mut pass = ResolvedPass::new(name, queue);
    pass.inputs = inputs
        .iter()
        .map(|(t, f)| PassSlot::new(*t, *f))
        .collect();
    pass.targets = targets
        .iter()
        .map(|(t, f)| PassSlot::new(*t, *f))
        .collect();
    pass
}
