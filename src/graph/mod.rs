//! The frame graph subsystem.
//!
//! Data flows one way through this module: the [`parser`] turns a textual description
//! into a [`CompositorGraph`]; the [`builder`] instantiates tasks and allocates
//! textures; the [`state`] planner computes merged resource states and flags mandatory
//! transitions and cross-queue fences; the [`schedule`] stage groups passes into ordered
//! command list batches; and [`execute`] replays the finished plan every frame. Only the
//! execution stage ever touches a live queue.
//!
//! # Example
//!
//! ```
//! use deimos::prelude::*;
//!
//! let mut library = GraphLibrary::new();
//! library.parse_file(
//!     r#"
//!     compositor main {
//!         texture sceneColor target_size RGBA16F;
//!         texture bloom target_size_div 2 RGBA16F;
//!         pass opaque {
//!             target sceneColor;
//!             material scene_opaque;
//!         }
//!         task bloomDownsample(compute_shader) {
//!             input sceneColor(read);
//!             target bloom(compute_shader);
//!         }
//!     }
//!     "#,
//! )?;
//! let graph = library.build_graph("main", SubstitutionContext::root())?;
//! assert_eq!(graph.passes().len(), 2);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod builder;
pub mod execute;
pub mod parser;
pub mod pass;
pub mod schedule;
pub mod state;
pub mod texture;

use std::collections::HashMap;

use crate::graph::pass::PassDescriptor;
use crate::graph::texture::TextureDescriptor;

/// A texture imported from another graph's view table rather than allocated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    /// Graph the texture is published under.
    pub graph: String,
    /// Texture name inside that graph.
    pub texture: String,
    /// Name this graph refers to the texture by.
    pub alias: String,
}

/// In-memory form of one compositor description: the texture map, the ordered pass
/// list, MRT group expansions and cross-graph imports.
#[derive(Debug, Default)]
pub struct CompositorGraph {
    /// Name of the compositor block this graph was parsed from.
    pub name: String,
    textures: Vec<TextureDescriptor>,
    texture_index: HashMap<String, usize>,
    passes: Vec<PassDescriptor>,
    mrt_groups: HashMap<String, Vec<String>>,
    imports: Vec<ImportDirective>,
}

impl CompositorGraph {
    /// Create an empty graph with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        CompositorGraph {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a texture declaration. A redeclaration of the same name wins over the
    /// earlier one, which matches hot-reload semantics.
    pub fn add_texture(&mut self, texture: TextureDescriptor) {
        match self.texture_index.get(&texture.name) {
            Some(&index) => self.textures[index] = texture,
            None => {
                self.texture_index
                    .insert(texture.name.clone(), self.textures.len());
                self.textures.push(texture);
            }
        }
    }

    /// Record that `base` expands to the given MRT member names.
    pub fn add_mrt_group(&mut self, base: impl Into<String>, members: Vec<String>) {
        self.mrt_groups.insert(base.into(), members);
    }

    /// Append a pass in declaration order.
    pub fn add_pass(&mut self, pass: PassDescriptor) {
        self.passes.push(pass);
    }

    /// Record a cross-graph import.
    pub fn add_import(&mut self, import: ImportDirective) {
        self.imports.push(import);
    }

    /// Look up a texture by (scoped) name.
    pub fn texture(&self, name: &str) -> Option<&TextureDescriptor> {
        self.texture_index.get(name).map(|&i| &self.textures[i])
    }

    /// All texture declarations, in declaration order.
    pub fn textures(&self) -> &[TextureDescriptor] {
        &self.textures
    }

    /// The ordered pass list.
    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    /// Cross-graph imports.
    pub fn imports(&self) -> &[ImportDirective] {
        &self.imports
    }

    /// Expand a texture reference to its MRT members, or to itself when it is not an
    /// MRT base name.
    pub fn expand(&self, name: &str) -> Vec<String> {
        match self.mrt_groups.get(name) {
            Some(members) => members.clone(),
            None => vec![name.to_owned()],
        }
    }

    /// MRT member names for a base, if `name` declared more than one format.
    pub fn mrt_members(&self, name: &str) -> Option<&[String]> {
        self.mrt_groups.get(name).map(|m| m.as_slice())
    }

    /// Every MRT group: base name and member list.
    pub fn mrt_groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.mrt_groups
            .iter()
            .map(|(base, members)| (base.as_str(), members.as_slice()))
    }

    /// Merge a sub-graph parsed through a `ref` directive into this graph. Everything
    /// the sub-graph declares is namespaced under `scope.`; slot references to names the
    /// sub-graph declares itself are rewritten, references to outer names are left as-is.
    pub fn absorb(&mut self, scope: &str, child: CompositorGraph) {
        let scoped = |name: &str| format!("{}.{}", scope, name);
        let declared: std::collections::HashSet<String> = child
            .texture_index
            .keys()
            .chain(child.mrt_groups.keys())
            .cloned()
            .collect();
        let child_pass_names: Vec<String> = child.passes.iter().map(|p| p.name.clone()).collect();

        for mut texture in child.textures {
            texture.name = scoped(&texture.name);
            self.add_texture(texture);
        }
        for (base, members) in child.mrt_groups {
            let members = members.iter().map(|m| scoped(m)).collect();
            self.add_mrt_group(scoped(&base), members);
        }
        for mut pass in child.passes {
            pass.name = scoped(&pass.name);
            for slot in pass.inputs.iter_mut().chain(pass.targets.iter_mut()) {
                if declared.contains(&slot.texture) {
                    slot.texture = scoped(&slot.texture);
                }
            }
            if let Some(after) = pass.after.take() {
                pass.after = Some(if child_pass_names.iter().any(|n| n == &after) {
                    scoped(&after)
                } else {
                    after
                });
            }
            self.passes.push(pass);
        }
        for import in child.imports {
            self.imports.push(import);
        }
    }
}
