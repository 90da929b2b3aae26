use deimos::graph::parser;
use deimos::prelude::*;

mod framework;
use framework::test_config;

#[test]
fn texture_declarations() -> anyhow::Result<()> {
    let graph = parser::parse(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            rwtexture depthDown target_size_div 2 R32F;
            texture lut 64 64 RGBA8 array 16;
            texture shadow:Depth 2048 2048 D32F;
            texture upscaled output_size RGBA8;
            texture half output_size_scaled 0.5 RGBA8;
        }
        "#,
        SubstitutionContext::root(),
    )?;

    let scene = graph.texture("sceneColor").unwrap();
    assert_eq!(scene.size, SizeRule::TargetScaled { num: 1, div: 1 });
    assert_eq!(scene.format, TextureFormat::Rgba16F);
    assert!(!scene.unordered_access);
    assert!(!scene.depth_stencil);

    let down = graph.texture("depthDown").unwrap();
    assert_eq!(down.size, SizeRule::TargetScaled { num: 1, div: 2 });
    assert!(down.unordered_access);

    let lut = graph.texture("lut").unwrap();
    assert_eq!(
        lut.size,
        SizeRule::Fixed {
            width: 64,
            height: 64
        }
    );
    assert_eq!(lut.array_size, 16);

    let shadow = graph.texture("shadow:Depth").unwrap();
    assert!(shadow.depth_stencil);

    assert_eq!(
        graph.texture("upscaled").unwrap().size,
        SizeRule::OutputScaled { num: 1, div: 1 }
    );
    assert_eq!(
        graph.texture("half").unwrap().size,
        SizeRule::OutputScaled { num: 500, div: 1000 }
    );
    Ok(())
}

#[test]
fn sizing_resolution() {
    let config = test_config();
    assert_eq!(
        SizeRule::TargetScaled { num: 1, div: 2 }.resolve(&config),
        (800, 450)
    );
    assert_eq!(
        SizeRule::OutputScaled { num: 1, div: 1 }.resolve(&config),
        (1920, 1080)
    );
    assert_eq!(SizeRule::Invalid.resolve(&config), (1, 1));
}

#[test]
fn unknown_tokens_degrade_to_sentinels() -> anyhow::Result<()> {
    let graph = parser::parse(
        r#"
        compositor main {
            texture weird target_size BGRA1010;
            texture sized fancy_size RGBA8;
        }
        "#,
        SubstitutionContext::root(),
    )?;
    assert_eq!(graph.texture("weird").unwrap().format, TextureFormat::Unknown);
    assert_eq!(graph.texture("sized").unwrap().size, SizeRule::Invalid);
    Ok(())
}

#[test]
fn mrt_declaration_expands_to_members() -> anyhow::Result<()> {
    let graph = parser::parse(
        r#"
        compositor main {
            texture gbuffer target_size RGBA8 RGBA16F;
            texture tagged target_size RGBA8:albedo RG16F:normals;
        }
        "#,
        SubstitutionContext::root(),
    )?;

    let members: Vec<&str> = graph
        .mrt_members("gbuffer")
        .unwrap()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(members, ["gbuffer:0", "gbuffer:1"]);
    assert_eq!(graph.texture("gbuffer:0").unwrap().format, TextureFormat::Rgba8);
    assert_eq!(graph.texture("gbuffer:1").unwrap().format, TextureFormat::Rgba16F);
    // The base name is not itself a texture; lookups expand to the member list.
    assert!(graph.texture("gbuffer").is_none());
    assert_eq!(graph.expand("gbuffer").len(), 2);

    let tagged: Vec<&str> = graph
        .mrt_members("tagged")
        .unwrap()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(tagged, ["tagged:albedo", "tagged:normals"]);
    assert_eq!(
        graph.texture("tagged:normals").unwrap().format,
        TextureFormat::Rg16F
    );
    Ok(())
}

#[test]
fn pass_and_task_declarations() -> anyhow::Result<()> {
    let graph = parser::parse(
        r#"
        compositor main {
            texture sceneColor target_size RGBA16F;
            rwtexture ao target_size R8;
            pass opaque {
                target sceneColor;
                material scene_opaque;
            }
            task ssao(compute_shader) {
                input sceneColor(read);
                target ao(compute_shader);
                entry main_cs;
                after opaque;
                sync aoDone signal;
            }
            pass resolve {
                target sceneColor;
                material resolve_mat;
                input ao(read);
                sync aoDone wait sync;
            }
        }
        "#,
        SubstitutionContext::root(),
    )?;

    let passes = graph.passes();
    assert_eq!(passes.len(), 3);

    let opaque = &passes[0];
    assert_eq!(opaque.name, "opaque");
    assert_eq!(
        opaque.kind,
        PassKind::Material {
            material: "scene_opaque".to_owned()
        }
    );
    assert_eq!(opaque.declared_queue(), QueueKind::Sync);

    let ssao = &passes[1];
    assert_eq!(ssao.task_type(), Some("ssao"));
    assert_eq!(ssao.declared_queue(), QueueKind::Async);
    assert_eq!(ssao.after.as_deref(), Some("opaque"));
    assert_eq!(ssao.inputs[0].flags, SlotFlags::READ);
    assert_eq!(ssao.targets[0].flags, SlotFlags::COMPUTE);
    assert_eq!(
        ssao.sync,
        vec![SyncMarker {
            fence: "aoDone".to_owned(),
            op: SyncOp::Signal,
            queue: QueueKind::Async,
        }]
    );
    match &ssao.kind {
        PassKind::Task { entry, .. } => assert_eq!(entry.as_deref(), Some("main_cs")),
        _ => panic!("expected task pass"),
    }

    let resolve = &passes[2];
    assert_eq!(
        resolve.sync,
        vec![SyncMarker {
            fence: "aoDone".to_owned(),
            op: SyncOp::Wait,
            queue: QueueKind::Sync,
        }]
    );
    Ok(())
}

#[test]
fn ref_includes_sub_graph_under_private_scope() -> anyhow::Result<()> {
    let mut library = GraphLibrary::new();
    library.parse_file(
        r#"
        compositor bloom {
            texture bright target_size_div 2 RGBA16F;
            task brightPass(compute_shader) {
                input $0(read);
                target bright(compute_shader);
            }
        }
        compositor main {
            texture sceneColor target_size RGBA16F;
            pass opaque {
                target sceneColor;
                material scene_opaque;
            }
            ref bloom(sceneColor);
        }
        "#,
    )?;
    let graph = library.build_graph("main", SubstitutionContext::root())?;

    // Sub-graph textures and passes land under the `bloom.` scope.
    assert!(graph.texture("bloom.bright").is_some());
    let bright = graph
        .passes()
        .iter()
        .find(|p| p.name == "bloom.brightPass")
        .unwrap();
    // `$0` resolved to the parent's texture, which keeps its unscoped name.
    assert_eq!(bright.inputs[0].texture, "sceneColor");
    assert_eq!(bright.targets[0].texture, "bloom.bright");
    Ok(())
}

#[test]
fn import_records_cross_graph_alias() -> anyhow::Result<()> {
    let graph = parser::parse(
        r#"
        compositor main {
            import postfx.lut;
            pass grade {
                target Output;
                material grade_mat;
                input postfx.lut(read);
            }
            texture Output output_size RGBA8;
        }
        "#,
        SubstitutionContext::root(),
    )?;
    assert_eq!(graph.imports().len(), 1);
    let import = &graph.imports()[0];
    assert_eq!(import.graph, "postfx");
    assert_eq!(import.texture, "lut");
    assert_eq!(import.alias, "postfx.lut");
    assert!(graph.texture("postfx.lut").unwrap().imported);
    Ok(())
}

#[test]
fn ref_cycle_is_rejected() {
    let mut library = GraphLibrary::new();
    library
        .parse_file(
            r#"
            compositor a { ref b; }
            compositor b { ref a; }
            "#,
        )
        .unwrap();
    let err = library
        .build_graph("a", SubstitutionContext::root())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::GraphHasCycle)
    ));
}

#[test]
fn malformed_source_is_a_parse_error() {
    for source in [
        "compositor main { texture foo target_size RGBA8 }",
        "compositor main { pass p { target x; }",
        "compositor main { widget w; }",
        "notacompositor main {}",
    ] {
        let err = parser::parse(source, SubstitutionContext::root()).unwrap_err();
        assert!(
            matches!(err.downcast_ref::<Error>(), Some(Error::ParseError { .. })),
            "source {:?} gave {:?}",
            source,
            err
        );
    }
}

#[test]
fn unknown_graph_reference() {
    let library = GraphLibrary::new();
    let err = library
        .build_graph("nope", SubstitutionContext::root())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::GraphNotFound(name)) if name == "nope"
    ));
}
