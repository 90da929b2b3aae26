use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use deimos::prelude::*;

mod framework;
use framework::{test_config, DeviceOp, MockDevice, ProbeTask, WorkerTask};

fn probe_registry(log: &Arc<Mutex<Vec<String>>>, names: &[&str]) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for name in names {
        let log = log.clone();
        registry.register(*name, move |_| {
            Box::new(ProbeTask {
                log: log.clone(),
                compute_on_sync: false,
            })
        });
    }
    registry
}

#[test]
fn passes_sharing_a_task_type_share_the_instance() -> anyhow::Result<()> {
    framework::init_logging();
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let instances = Arc::new(AtomicUsize::new(0));

    let mut registry = TaskRegistry::new();
    {
        let log = log.clone();
        let instances = instances.clone();
        registry.register("blur", move |_| {
            instances.fetch_add(1, Ordering::SeqCst);
            Box::new(ProbeTask {
                log: log.clone(),
                compute_on_sync: false,
            })
        });
    }

    let mut compositor = Compositor::new(device, test_config(), registry);
    compositor.load_source(
        r#"
        compositor main {
            texture a target_size RGBA8;
            texture b target_size RGBA8;
            task blur(compute_shader) {
                target a(compute_shader);
            }
            task blur(compute_shader) {
                target b(compute_shader);
            }
        }
        "#,
    )?;
    compositor.activate("main")?;

    // One factory call, but both passes were initialized through the shared instance.
    assert_eq!(instances.load(Ordering::SeqCst), 1);
    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries.iter().filter(|e| e.starts_with("initialize")).count(),
        2
    );
    Ok(())
}

#[test]
fn missing_task_factory_is_not_fatal() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut compositor = Compositor::new(device, test_config(), TaskRegistry::new());
    compositor.load_source(
        r#"
        compositor main {
            texture sceneColor target_size RGBA8;
            pass opaque {
                target sceneColor;
                material scene_opaque;
            }
            task ghostTask() {
                input sceneColor(read);
            }
        }
        "#,
    )?;
    compositor.activate("main")?;
    // Nothing renders, but the frame loop keeps going.
    compositor.render_frame()?;
    Ok(())
}

#[test]
fn mrt_members_occupy_contiguous_view_slots() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut compositor =
        Compositor::new(device, test_config(), probe_registry(&log, &["material"]));
    compositor.load_source(
        r#"
        compositor main {
            texture gbuffer target_size RGBA8:albedo RGBA16F:normals;
            pass geometry {
                target gbuffer;
                material gbuffer_mat;
            }
        }
        "#,
    )?;
    compositor.activate("main")?;

    let views = compositor.views();
    let albedo = views.slot("main:gbuffer:albedo").unwrap();
    let normals = views.slot("main:gbuffer:normals").unwrap();
    assert_eq!(normals, albedo + 1);

    // The geometry pass expands the base name to both members.
    let built = compositor.built().unwrap();
    let targets: Vec<&str> = built.passes()[0]
        .targets
        .iter()
        .map(|s| s.texture.as_str())
        .collect();
    assert_eq!(targets, ["gbuffer:albedo", "gbuffer:normals"]);
    assert!(built.dependency_dot().contains("geometry"));
    Ok(())
}

#[test]
fn upscaler_toggle_reloads_only_render_sized_textures() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut compositor = Compositor::new(
        device.clone(),
        test_config(),
        probe_registry(&log, &["material"]),
    );
    compositor.load_source(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            texture lut 64 64 RGBA8;
            pass opaque {
                target sceneColor;
                material scene_opaque;
                input lut(read);
            }
        }
        "#,
    )?;
    compositor.activate("main")?;
    let generation = compositor.views().generation();
    device.clear_ops();

    compositor.set_upscaler(UpscalerMode::Performance)?;

    let created = device.created_textures();
    assert_eq!(created.len(), 1, "only the render-sized texture reloads");
    assert_eq!(created[0].name, "main:sceneColor");
    assert_eq!((created[0].width, created[0].height), (800, 450));
    // The old texture was torn down and cached external handles went stale.
    assert!(device
        .ops()
        .iter()
        .any(|op| matches!(op, DeviceOp::DestroyTexture(_))));
    assert!(compositor.views().generation() > generation);

    // Toggling to the same mode again is a no-op.
    device.clear_ops();
    compositor.set_upscaler(UpscalerMode::Performance)?;
    assert!(device.created_textures().is_empty());
    Ok(())
}

#[test]
fn reload_is_idempotent() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut compositor = Compositor::new(
        device.clone(),
        test_config(),
        probe_registry(&log, &["material"]),
    );
    compositor.load_source(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            pass opaque {
                target sceneColor;
                material scene_opaque;
            }
        }
        "#,
    )?;
    compositor.activate("main")?;

    device.clear_ops();
    compositor.reload_textures()?;
    compositor.reload_textures()?;
    assert!(
        device.created_textures().is_empty(),
        "unchanged textures must not be recreated"
    );
    Ok(())
}

#[test]
fn output_aliases_the_back_buffer() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut config = test_config();
    config.render_to_output = true;
    let mut compositor = Compositor::new(
        device.clone(),
        config,
        probe_registry(&log, &["material"]),
    );
    compositor.load_source(
        r#"
        compositor main {
            texture Output output_size RGBA8;
            pass present {
                target Output;
                material blit;
            }
        }
        "#,
    )?;
    compositor.activate("main")?;

    assert!(device.created_textures().is_empty());
    assert_eq!(
        compositor.views().resolve("main:Output"),
        Some(TextureHandle(u64::MAX))
    );
    Ok(())
}

#[test]
fn device_failure_keeps_previous_resources() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut compositor = Compositor::new(
        device.clone(),
        test_config(),
        probe_registry(&log, &["material"]),
    );
    compositor.load_source(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            pass opaque {
                target sceneColor;
                material scene_opaque;
            }
        }
        "#,
    )?;
    compositor.activate("main")?;
    let before = compositor.views().resolve("main:sceneColor").unwrap();

    device.fail_texture_creation(true);
    compositor.resize(1280, 720)?;

    // The resize failed to create the new texture; the stale one stays published.
    assert_eq!(compositor.views().resolve("main:sceneColor"), Some(before));

    device.fail_texture_creation(false);
    compositor.reload_textures()?;
    assert_ne!(compositor.views().resolve("main:sceneColor"), Some(before));
    Ok(())
}

#[test]
fn frame_execution_orders_waits_submits_and_signals() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = probe_registry(&log, &["material"]);
    {
        let log = log.clone();
        registry.register("depthDownsample", move |_| {
            Box::new(ProbeTask {
                log: log.clone(),
                compute_on_sync: false,
            })
        });
    }
    let mut compositor = Compositor::new(device.clone(), test_config(), registry);
    compositor.load_source(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            rwtexture depthDown target_size_div 2 R32F;
            task depthDownsample(compute_shader) {
                target depthDown(compute_shader);
                sync downDone signal;
            }
            pass ssao {
                target sceneColor;
                material ssao_mat;
                input depthDown(read);
                sync downDone wait;
            }
        }
        "#,
    )?;
    compositor.activate("main")?;
    device.clear_ops();
    compositor.render_frame()?;

    let ops = device.ops();
    let position = |pred: &dyn Fn(&DeviceOp) -> bool| ops.iter().position(pred).unwrap();

    let async_submit = position(&|op| {
        matches!(op, DeviceOp::Submit { queue, .. } if *queue == QueueKind::Async)
    });
    let signal = position(&|op| matches!(op, DeviceOp::Signal { .. }));
    let wait = position(&|op| matches!(op, DeviceOp::Wait { .. }));
    let sync_submit = position(&|op| {
        matches!(op, DeviceOp::Submit { queue, .. } if *queue == QueueKind::Sync)
    });

    // Batch order: async work submits, then signals; the sync batch waits before it
    // submits anything.
    assert!(async_submit < signal);
    assert!(signal < wait || wait < async_submit, "wait binds to the sync batch");
    assert!(wait < sync_submit);

    // The compute task ran through its compute entry point; the material pass ran on
    // the sync queue.
    let entries = log.lock().unwrap().clone();
    assert!(entries.contains(&"run_compute depthDownsample".to_owned()));
    assert!(entries.contains(&"run ssao".to_owned()));

    // Fence values advance monotonically across frames.
    let first_signal = ops
        .iter()
        .find_map(|op| match op {
            DeviceOp::Signal { value, .. } => Some(*value),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_signal, 1);

    device.clear_ops();
    compositor.render_frame()?;
    let second_signal = device
        .ops()
        .iter()
        .find_map(|op| match op {
            DeviceOp::Signal { value, .. } => Some(*value),
            _ => None,
        })
        .unwrap();
    assert_eq!(second_signal, 2);
    Ok(())
}

#[test]
fn transitions_are_recorded_from_the_plan() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut compositor = Compositor::new(
        device.clone(),
        test_config(),
        probe_registry(&log, &["material"]),
    );
    compositor.load_source(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            texture final target_size RGBA8;
            pass opaque {
                target sceneColor;
                material scene_opaque;
            }
            pass post {
                target final;
                material post_mat;
                input sceneColor(read);
            }
        }
        "#,
    )?;
    compositor.activate("main")?;
    device.clear_ops();
    compositor.render_frame()?;

    let scene_handle = compositor
        .built()
        .unwrap()
        .texture("sceneColor")
        .unwrap()
        .handle;
    let transitions: Vec<_> = device
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            DeviceOp::Transition {
                texture, from, to, ..
            } if texture == scene_handle => Some((from, to)),
            _ => None,
        })
        .collect();
    assert!(transitions.contains(&(
        ResourceState::RENDER_TARGET,
        ResourceState::PIXEL_SHADER_RESOURCE
    )));
    assert!(transitions.contains(&(
        ResourceState::PIXEL_SHADER_RESOURCE,
        ResourceState::RENDER_TARGET
    )));
    Ok(())
}

#[test]
fn worker_subtasks_join_through_wait_any() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TaskRegistry::new();
    {
        let log = log.clone();
        registry.register("shadowCascades", move |_| {
            Box::new(WorkerTask {
                log: log.clone(),
                force_order: false,
            })
        });
    }
    let mut compositor = Compositor::new(device.clone(), test_config(), registry);
    compositor.load_source(
        r#"
        compositor main {
            rwtexture shadowMask target_size R8;
            task shadowCascades(compute_shader) {
                target shadowMask(compute_shader);
            }
        }
        "#,
    )?;
    compositor.activate("main")?;
    device.clear_ops();
    compositor.render_frame()?;

    // The worker recorded off-thread; its list is joined through the wait-any and
    // submitted on the async queue after the batch's inline list.
    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, vec!["recorded shadowCascades".to_owned()]);
    let submitted: Vec<Vec<CommandList>> = device
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            DeviceOp::Submit { queue, lists } if queue == QueueKind::Async => Some(lists),
            _ => None,
        })
        .collect();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].len(), 1, "the deferred list submits on its own");
    Ok(())
}

#[test]
fn undeclared_cross_queue_hand_off_fails_activation() {
    let device = MockDevice::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut compositor = Compositor::new(
        device,
        test_config(),
        probe_registry(&log, &["material", "depthDownsample"]),
    );
    compositor
        .load_source(
            r#"
            compositor main {
                texture sceneColor target_size RGBA16F;
                rwtexture depthDown target_size_div 2 R32F;
                task depthDownsample(compute_shader) {
                    target depthDown(compute_shader);
                }
                pass ssao {
                    target sceneColor;
                    material ssao_mat;
                    input depthDown(read);
                }
            }
            "#,
        )
        .unwrap();
    let err = compositor.activate("main").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::CrossQueueHazard { .. })
    ));
}
