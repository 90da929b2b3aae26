//! The graph/pass builder.
//!
//! Takes a parsed [`CompositorGraph`] and produces a [`BuiltGraph`]: one task instance
//! per task *type* (passes sharing a task name share the instance), every declared
//! texture allocated at its resolved size and published to the shared view table, the
//! state plan computed and the batch schedule built. The builder is the only stage that
//! creates device objects; everything downstream replays what is decided here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use petgraph::dot::Dot;
use petgraph::Graph;

use crate::core::config::CompositorConfig;
use crate::core::device::{RenderDevice, TextureCreateInfo, TextureHandle};
use crate::core::error::Error;
use crate::core::view_table::ViewTable;
use crate::graph::pass::{PassDescriptor, PassKind, PassSlot, SyncMarker};
use crate::graph::schedule::{build_batches, FrameSchedule};
use crate::graph::state::{plan_states, ResourceState, StatePlan};
use crate::graph::CompositorGraph;
use crate::sync::domain::QueueKind;
use crate::sync::fence::FencePool;
use crate::task::{AsyncSubtask, CompositorTask, TaskContext, TaskRegistry, MATERIAL_TASK};

/// Name of the texture that may alias the swap chain back buffer.
pub const OUTPUT_TEXTURE: &str = "Output";

/// A pass after task resolution and MRT expansion: what the planner, the scheduler and
/// the execution engine operate on.
#[derive(Debug, Clone)]
pub struct ResolvedPass {
    /// Pass name from the description.
    pub name: String,
    /// Queue the pass executes on, with task capabilities applied.
    pub queue: QueueKind,
    /// Input slots, MRT base names expanded to members.
    pub inputs: Vec<PassSlot>,
    /// Target slots, MRT base names expanded to members.
    pub targets: Vec<PassSlot>,
    /// Ordering hint against another pass.
    pub after: Option<String>,
    /// Explicit sync markers in declaration order.
    pub sync: Vec<SyncMarker>,
    /// Material name for fixed-function passes.
    pub material: Option<String>,
    /// Entry point forwarded to the task.
    pub entry: Option<String>,
    /// Index of the shared task instance, if a factory was registered.
    pub task: Option<usize>,
    /// The task demands strict one-subtask-per-batch sequencing.
    pub force_order: bool,
    /// Indices into the built graph's subtask list.
    pub subtasks: Vec<usize>,
}

impl ResolvedPass {
    /// Bare pass for synthetic pass lists (mainly tests and tooling).
    pub fn new(name: impl Into<String>, queue: QueueKind) -> Self {
        ResolvedPass {
            name: name.into(),
            queue,
            inputs: Vec::new(),
            targets: Vec::new(),
            after: None,
            sync: Vec::new(),
            material: None,
            entry: None,
            task: None,
            force_order: false,
            subtasks: Vec::new(),
        }
    }
}

/// A texture created by the builder, with the info it was created from so reloads can
/// skip unchanged textures.
#[derive(Debug, Clone)]
pub struct AllocatedTexture {
    /// Opaque device handle.
    pub handle: TextureHandle,
    /// Creation parameters, compared on reload.
    pub info: TextureCreateInfo,
    /// The texture aliases the back buffer and is not owned by the builder.
    pub external: bool,
}

/// A fully built graph: task instances, allocated textures, the state plan and the
/// batch schedule. Created by [`build_graph`], executed by
/// [`execute_frame`](BuiltGraph::execute_frame), reloaded in place on resize or
/// upscaler toggles.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct BuiltGraph {
    pub(crate) name: String,
    pub(crate) graph: CompositorGraph,
    pub(crate) passes: Vec<ResolvedPass>,
    pub(crate) descriptors: Vec<PassDescriptor>,
    #[derivative(Debug = "ignore")]
    pub(crate) tasks: Vec<Box<dyn CompositorTask>>,
    pub(crate) subtasks: Vec<AsyncSubtask>,
    pub(crate) textures: HashMap<String, AllocatedTexture>,
    pub(crate) plan: StatePlan,
    pub(crate) schedule: FrameSchedule,
    pub(crate) dependencies: Graph<String, String>,
    pub(crate) frame_index: u64,
}

impl BuiltGraph {
    /// The resolved pass list.
    pub fn passes(&self) -> &[ResolvedPass] {
        &self.passes
    }

    /// The computed state plan.
    pub fn plan(&self) -> &StatePlan {
        &self.plan
    }

    /// The batch schedule.
    pub fn schedule(&self) -> &FrameSchedule {
        &self.schedule
    }

    /// Allocated texture by scoped name.
    pub fn texture(&self, name: &str) -> Option<&AllocatedTexture> {
        self.textures.get(name)
    }

    /// Pass dependency graph in graphviz `dot` format, for debugging.
    pub fn dependency_dot(&self) -> String {
        format!("{}", Dot::new(&self.dependencies))
    }

    /// Re-evaluate every texture size against `config` and recreate what changed, then
    /// let tasks re-cache their device handles. Idempotent; textures with unchanged
    /// size and format are left alone. Failures keep the previous resources in place.
    pub fn reload_textures(
        &mut self,
        device: &Arc<dyn RenderDevice>,
        config: &CompositorConfig,
        views: &mut ViewTable,
    ) -> Result<()> {
        allocate_textures(
            &self.graph,
            &self.plan,
            device,
            config,
            views,
            &mut self.textures,
        );
        let ctx = TaskContext {
            device,
            config,
            views,
            graph: &self.name,
        };
        for (pass, desc) in self.passes.iter().zip(&self.descriptors) {
            if let Some(task) = pass.task {
                self.tasks[task].resize(desc, &ctx)?;
            }
        }
        Ok(())
    }
}

/// Instantiate tasks, allocate textures, plan states and build batches for `graph`.
///
/// `previous` carries the textures of an earlier build of the same graph across a
/// reload; unchanged textures keep their device objects. Pass an empty map for a
/// first build.
pub fn build_graph(
    graph: CompositorGraph,
    registry: &TaskRegistry,
    device: &Arc<dyn RenderDevice>,
    config: &CompositorConfig,
    views: &mut ViewTable,
    fences: &mut FencePool,
    previous: HashMap<String, AllocatedTexture>,
) -> Result<BuiltGraph> {
    let name = graph.name.clone();
    let mut ctx = TaskContext {
        device,
        config,
        views,
        graph: &name,
    };

    // One instance per task type. A missing factory is not fatal: the pass simply has
    // no task, which shows up as nothing rendering.
    let mut tasks: Vec<Box<dyn CompositorTask>> = Vec::new();
    let mut task_index: HashMap<String, Option<usize>> = HashMap::new();
    for pass in graph.passes() {
        let task_type = match &pass.kind {
            PassKind::Task { task_type, .. } => task_type.clone(),
            PassKind::Material { .. } => MATERIAL_TASK.to_owned(),
        };
        if task_index.contains_key(&task_type) {
            continue;
        }
        let instance = registry.create(&task_type, &mut ctx);
        if instance.is_none() {
            warn!("No task factory registered for `{}`", task_type);
        }
        let slot = instance.map(|task| {
            tasks.push(task);
            tasks.len() - 1
        });
        task_index.insert(task_type, slot);
    }

    // Initialization may register async subtasks (work recorded on worker threads).
    let mut subtasks: Vec<AsyncSubtask> = Vec::new();
    let mut pass_subtasks: Vec<Vec<usize>> = Vec::new();
    let descriptors: Vec<PassDescriptor> = graph.passes().to_vec();
    for desc in &descriptors {
        let task_type = desc.task_type().unwrap_or(MATERIAL_TASK);
        let mut indices = Vec::new();
        if let Some(&Some(slot)) = task_index.get(task_type) {
            for subtask in tasks[slot].initialize(desc, &mut ctx)? {
                indices.push(subtasks.len());
                subtasks.push(subtask);
            }
        }
        pass_subtasks.push(indices);
    }

    // Resolve passes: effective queue, MRT slot expansion, texture validation.
    let mut passes = Vec::new();
    for (desc, subtask_indices) in descriptors.iter().zip(pass_subtasks) {
        let task_type = desc.task_type().unwrap_or(MATERIAL_TASK);
        let task = task_index.get(task_type).copied().flatten();
        let mut queue = desc.declared_queue();
        if queue == QueueKind::Async {
            if let Some(slot) = task {
                if tasks[slot].writes_sync_compute_commands() {
                    queue = QueueKind::Sync;
                }
            }
        }
        let expand = |slots: &[PassSlot]| -> Result<Vec<PassSlot>> {
            let mut out = Vec::new();
            for slot in slots {
                for member in graph.expand(&slot.texture) {
                    if graph.texture(&member).is_none() {
                        return Err(Error::UnknownTexture(member).into());
                    }
                    out.push(PassSlot::new(member, slot.flags));
                }
            }
            Ok(out)
        };
        passes.push(ResolvedPass {
            name: desc.name.clone(),
            queue,
            inputs: expand(&desc.inputs)?,
            targets: expand(&desc.targets)?,
            after: desc.after.clone(),
            sync: desc.sync.clone(),
            material: match &desc.kind {
                PassKind::Material { material } if !material.is_empty() => {
                    Some(material.clone())
                }
                _ => None,
            },
            entry: match &desc.kind {
                PassKind::Task { entry, .. } => entry.clone(),
                _ => None,
            },
            task,
            force_order: task
                .map(|slot| tasks[slot].force_task_order())
                .unwrap_or(false),
            subtasks: subtask_indices,
        });
    }

    let dependencies = dependency_graph(&passes)?;

    // Plan states before touching the device: a fresh texture starts its life in the
    // state its first usage expects.
    let depth_textures: HashSet<String> = graph
        .textures()
        .iter()
        .filter(|t| t.depth_stencil)
        .map(|t| t.name.clone())
        .collect();
    let mut presentable = HashSet::new();
    if config.render_to_output {
        presentable.insert(OUTPUT_TEXTURE.to_owned());
    }
    let plan = plan_states(&passes, &depth_textures, &presentable)?;

    let mut textures = previous;
    allocate_textures(&graph, &plan, device, config, views, &mut textures);

    // Resize after allocation so tasks can cache handles out of the view table.
    let ctx = TaskContext {
        device,
        config,
        views,
        graph: &name,
    };
    for (pass, desc) in passes.iter().zip(&descriptors) {
        if let Some(slot) = pass.task {
            tasks[slot].resize(desc, &ctx)?;
        }
    }

    let schedule = build_batches(&passes, fences, device)?;

    info!(
        "Built graph `{}`: {} passes, {} textures, {} batches, {} transitions",
        name,
        passes.len(),
        textures.len(),
        schedule.batches().len(),
        plan.transition_count()
    );

    Ok(BuiltGraph {
        name,
        graph,
        passes,
        descriptors,
        tasks,
        subtasks,
        textures,
        plan,
        schedule,
        dependencies,
        frame_index: 0,
    })
}

/// Producer/consumer edges per texture plus explicit `after` hints. An `after` naming
/// a later pass turns into a back edge and fails the cycle check.
fn dependency_graph(passes: &[ResolvedPass]) -> Result<Graph<String, String>> {
    let mut graph = Graph::new();
    let nodes: Vec<_> = passes
        .iter()
        .map(|pass| graph.add_node(pass.name.clone()))
        .collect();
    for (i, pass) in passes.iter().enumerate() {
        for (j, earlier) in passes.iter().enumerate().take(i) {
            let uses = |p: &ResolvedPass, name: &str| {
                p.inputs.iter().chain(&p.targets).any(|s| s.texture == name)
            };
            for slot in earlier.targets.iter() {
                if uses(pass, &slot.texture) {
                    graph.update_edge(nodes[j], nodes[i], slot.texture.clone());
                }
            }
        }
        if let Some(after) = &pass.after {
            if let Some(j) = passes.iter().position(|p| &p.name == after) {
                graph.update_edge(nodes[j], nodes[i], "after".to_owned());
            } else {
                warn!("Pass `{}` declares `after {}`, which does not exist", pass.name, after);
            }
        }
    }
    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(Error::GraphHasCycle.into());
    }
    Ok(graph)
}

/// Allocate or re-allocate every declared texture. A texture whose creation parameters
/// are unchanged keeps its handle; a changed one is recreated starting in the state its
/// previous incarnation ends the frame in, so in-flight plans stay correct. Device
/// failures leave the previous resource in place.
fn allocate_textures(
    graph: &CompositorGraph,
    plan: &StatePlan,
    device: &Arc<dyn RenderDevice>,
    config: &CompositorConfig,
    views: &mut ViewTable,
    textures: &mut HashMap<String, AllocatedTexture>,
) {
    let mut changed = false;
    for desc in graph.textures() {
        if desc.imported {
            continue;
        }
        let (width, height) = desc.size.resolve(config);
        let initial_state = match textures.get(&desc.name) {
            // Carry the state the old incarnation is left in at the frame boundary.
            Some(_) => plan
                .timeline(&desc.name)
                .and_then(|t| t.usages.last())
                .map(|(_, s)| s.next)
                .unwrap_or(ResourceState::COMMON),
            None => plan
                .creation_state(&desc.name)
                .unwrap_or(ResourceState::COMMON),
        };
        let info = TextureCreateInfo {
            name: format!("{}:{}", graph.name, desc.name),
            width,
            height,
            format: desc.format,
            array_size: desc.array_size,
            unordered_access: desc.unordered_access,
            depth_stencil: desc.depth_stencil,
            initial_state,
        };

        if desc.name == OUTPUT_TEXTURE && config.render_to_output {
            let old = textures.insert(
                desc.name.clone(),
                AllocatedTexture {
                    handle: device.back_buffer(),
                    info,
                    external: true,
                },
            );
            if let Some(old) = old.filter(|t| !t.external) {
                device.destroy_texture(old.handle);
            }
            continue;
        }

        let unchanged = textures.get(&desc.name).is_some_and(|existing| {
            !existing.external
                && existing.info.width == info.width
                && existing.info.height == info.height
                && existing.info.format == info.format
                && existing.info.array_size == info.array_size
                && existing.info.unordered_access == info.unordered_access
                && existing.info.depth_stencil == info.depth_stencil
        });
        if unchanged {
            continue;
        }

        match device.create_texture(&info) {
            Ok(handle) => {
                if let Some(old) = textures.insert(
                    desc.name.clone(),
                    AllocatedTexture {
                        handle,
                        info,
                        external: false,
                    },
                ) {
                    if !old.external {
                        device.destroy_texture(old.handle);
                    }
                }
                changed = true;
            }
            Err(err) => {
                // Keep the stale resource; a wrong-sized texture beats a dead frame loop.
                error!("Failed to create texture `{}`: {}", info.name, err);
            }
        }
    }

    // Publish to the shared view table. MRT members go into contiguous slots under
    // their member names; imports alias another graph's published view.
    let mut grouped: HashSet<&String> = HashSet::new();
    for (_, members) in graph.mrt_groups() {
        let keys: Vec<String> = members
            .iter()
            .map(|member| format!("{}:{}", graph.name, member))
            .collect();
        let handles: Option<Vec<TextureHandle>> = members
            .iter()
            .map(|member| textures.get(member).map(|a| a.handle))
            .collect();
        if let Some(handles) = handles {
            views.publish_group(&keys, &handles);
        }
        grouped.extend(members);
    }
    for desc in graph.textures() {
        if desc.imported || grouped.contains(&desc.name) {
            continue;
        }
        if let Some(allocated) = textures.get(&desc.name) {
            views.publish(format!("{}:{}", graph.name, desc.name), allocated.handle);
        }
    }
    for import in graph.imports() {
        let source = format!("{}:{}", import.graph, import.texture);
        match views.resolve(&source) {
            Some(handle) => {
                views.publish(format!("{}:{}", graph.name, import.alias), handle);
                textures.insert(
                    import.alias.clone(),
                    AllocatedTexture {
                        handle,
                        info: TextureCreateInfo {
                            name: source,
                            width: 0,
                            height: 0,
                            format: Default::default(),
                            array_size: 1,
                            unordered_access: false,
                            depth_stencil: false,
                            initial_state: ResourceState::COMMON,
                        },
                        external: true,
                    },
                );
            }
            None => warn!("Import `{}` is not published yet", source),
        }
    }
    if changed {
        views.bump_generation();
    }
}
