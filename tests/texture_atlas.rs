use easel::color::Color;
use easel::config::RendererConfig;
use easel::error::RenderError;
use easel::geometry::{Rect, Vec2};
use easel::gpu::{CallLog, Compositor, DeviceCall, GpuRenderer, RecordingDevice, Topology};
use easel::image::Image;
use easel::renderer::Renderer;
use easel::texture::{
    region_key, AtlasData, AtlasFormat, SpriteSheet, TextureAtlas, TextureCache,
};
use easel::transform::Transform;

const SHEET: &str = r#"{
    "frames": [
        {
            "filename": "hero",
            "frame": {"x": 0, "y": 0, "w": 32, "h": 64},
            "trimmed": true,
            "spriteSourceSize": {"x": 2, "y": 4, "w": 32, "h": 64},
            "sourceSize": {"w": 36, "h": 68},
            "pivot": {"x": 0.5, "y": 0.5}
        },
        {
            "filename": "gem",
            "frame": {"x": 64, "y": 32, "w": 16, "h": 16}
        },
        {
            "frame": {"x": 0, "y": 0, "w": 1, "h": 1}
        }
    ],
    "meta": {
        "app": "https://www.codeandweb.com/texturepacker",
        "image": "sprites.png",
        "size": {"w": 128, "h": 64}
    }
}"#;

fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-6
}

fn recording_compositor() -> (Compositor<RecordingDevice>, CallLog) {
    let device = RecordingDevice::new(4);
    let log = device.log();
    let compositor = Compositor::new(device, &RendererConfig::new(128, 128)).unwrap();
    log.borrow_mut().clear();
    (compositor, log)
}

fn uploaded_uvs(log: &CallLog) -> Vec<[f32; 2]> {
    log.borrow()
        .iter()
        .filter_map(|c| match c {
            DeviceCall::UploadVertices(v) => Some(v.clone()),
            _ => None,
        })
        .flatten()
        .collect::<Vec<f32>>()
        .chunks(8)
        .map(|v| [v[2], v[3]])
        .collect()
}

#[test]
fn test_producers_are_identified() {
    let data = AtlasData::from_json(SHEET).unwrap();
    assert_eq!(data.format().unwrap(), AtlasFormat::TexturePacker);

    let aseprite = r#"{"meta":{"app":"http://www.aseprite.org/","size":{"w":8,"h":8}},
        "frames":{"walk 0.aseprite":{"frame":{"x":0,"y":0,"w":8,"h":8}}}}"#;
    let atlas = TextureAtlas::from_json(aseprite, Image::new(8, 8).unwrap()).unwrap();
    assert_eq!(atlas.format(), AtlasFormat::Aseprite);
    assert!(atlas.region("walk 0.aseprite").is_some());
}

#[test]
fn test_unsupported_producers_are_rejected() {
    let shoebox = r#"{"meta":{"app":"ShoeBox","size":{"w":8,"h":8}},"frames":[]}"#;
    let gimp = r#"{"meta":{"app":"gimp","size":{"w":8,"h":8}},"frames":[]}"#;

    for json in [shoebox, gimp] {
        let result = TextureAtlas::from_json(json, Image::new(8, 8).unwrap());
        assert!(matches!(result, Err(RenderError::UnknownAtlasFormat { .. })));
    }

    let exported = r#"{"meta":{"app":"ShoeBox","exporter":"melonJS","size":{"w":8,"h":8}},"frames":[]}"#;
    let atlas = TextureAtlas::from_json(exported, Image::new(8, 8).unwrap()).unwrap();
    assert_eq!(atlas.format(), AtlasFormat::ShoeBox);
}

#[test]
fn test_named_frames_and_pivot() {
    let atlas = TextureAtlas::from_json(SHEET, Image::new(128, 64).unwrap()).unwrap();
    let mut names: Vec<&str> = atlas.region_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["gem", "hero"]);

    // (36 * 0.5 - 2) / 32, (68 * 0.5 - 4) / 64
    let anchor = atlas.region("hero").unwrap().anchor_point.unwrap();
    assert!(approx_eq(anchor.x, 0.5));
    assert!(approx_eq(anchor.y, 30.0 / 64.0));
}

#[test]
fn test_literal_and_missing_keys() {
    let mut atlas = TextureAtlas::from_image(Image::new(100, 100).unwrap().with_name("tiles"));
    let uvs = atlas.uvs("10,20,30,40").unwrap();
    assert_eq!(uvs, [0.1, 0.2, 0.4, 0.6]);

    match atlas.resolve("missing") {
        Err(RenderError::RegionNotFound { region, .. }) => assert_eq!(region, "missing"),
        other => panic!("expected a missing region, got {:?}", other.map(|r| r.name.clone())),
    }
}

#[test]
fn test_spritesheet_cells_and_anchor() {
    let sheet = SpriteSheet::new(32, 32).anchor_point(Vec2::new(0.5, 1.0));
    let atlas = TextureAtlas::from_spritesheet(sheet, Image::new(70, 70).unwrap());

    // 70x70 truncates to a 2x2 grid of whole cells
    assert_eq!(atlas.region_names().count(), 4);
    let last = atlas.region("3").unwrap();
    assert_eq!(last.offset, Vec2::new(32.0, 32.0));
    assert_eq!(last.uvs, [0.5, 0.5, 1.0, 1.0]);
    assert_eq!(last.anchor_point, Some(Vec2::new(0.5, 1.0)));
}

#[test]
fn test_quads_sample_their_region() {
    let (mut compositor, log) = recording_compositor();
    let mut cache = TextureCache::new(4);
    let image = Image::new(128, 64).unwrap();
    cache
        .set(TextureAtlas::from_json(SHEET, image.clone()).unwrap())
        .unwrap();

    compositor
        .add_quad(
            &mut cache,
            &image,
            "gem",
            Rect::new(0.0, 0.0, 16.0, 16.0),
            Color::WHITE,
            &Transform::IDENTITY,
        )
        .unwrap();
    compositor.flush();

    let uvs = uploaded_uvs(&log);
    assert_eq!(uvs.len(), 4);
    assert_eq!(uvs[0], [0.5, 0.5]);
    assert_eq!(uvs[3], [0.625, 0.75]);
}

#[test]
fn test_multipack_pages_bind_separately() {
    let page = |name: &str, frame: &str| {
        AtlasData::from_json(&format!(
            r#"{{"meta":{{"app":"texturepacker","image":"{name}","size":{{"w":16,"h":16}}}},
                "frames":[{{"filename":"{frame}","frame":{{"x":0,"y":0,"w":16,"h":16}}}}]}}"#
        ))
        .unwrap()
    };
    let first = Image::new(16, 16).unwrap();
    let second = Image::new(16, 16).unwrap();
    let atlas = TextureAtlas::from_multipack(vec![
        (page("a.png", "left"), first.clone()),
        (page("b.png", "right"), second.clone()),
    ])
    .unwrap();

    let (mut compositor, log) = recording_compositor();
    let mut cache = TextureCache::new(4);
    cache.set(atlas).unwrap();
    assert_eq!(cache.unit_of(first.id()), Some(0));
    assert_eq!(cache.unit_of(second.id()), Some(1));

    for (key, x) in [("left", 0.0), ("right", 16.0)] {
        compositor
            .add_quad(
                &mut cache,
                &first,
                key,
                Rect::new(x, 0.0, 16.0, 16.0),
                Color::WHITE,
                &Transform::IDENTITY,
            )
            .unwrap();
    }
    compositor.flush();

    let calls = log.borrow();
    let draws: Vec<&DeviceCall> = calls.iter().filter(|c| c.is_draw()).collect();
    assert_eq!(
        draws,
        vec![
            &DeviceCall::DrawIndexed(Topology::TriangleList, 6),
            &DeviceCall::DrawIndexed(Topology::TriangleList, 6),
        ]
    );
    let units: Vec<usize> = calls
        .iter()
        .filter_map(|c| match c {
            DeviceCall::BindTexture(unit, _) => Some(*unit),
            _ => None,
        })
        .collect();
    assert_eq!(units, vec![0, 1]);
}

#[test]
fn test_multipack_past_capacity_overflows() {
    let mut cache = TextureCache::new(1);
    let page = |name: &str| {
        AtlasData::from_json(&format!(
            r#"{{"meta":{{"app":"texturepacker","image":"{name}","size":{{"w":8,"h":8}}}},"frames":[]}}"#
        ))
        .unwrap()
    };
    let atlas = TextureAtlas::from_multipack(vec![
        (page("a.png"), Image::new(8, 8).unwrap()),
        (page("b.png"), Image::new(8, 8).unwrap()),
    ])
    .unwrap();
    assert!(matches!(
        cache.set(atlas),
        Err(RenderError::TextureCacheOverflow {
            requested: 2,
            available: 1
        })
    ));
    assert_eq!(region_key(0.0, 0.0, 8.0, 8.0), "0,0,8,8");
}

#[test]
fn test_renderer_draws_named_region() {
    let device = RecordingDevice::new(4);
    let log = device.log();
    let mut renderer = GpuRenderer::new(device, RendererConfig::new(128, 128)).unwrap();
    let image = Image::new(128, 64).unwrap();
    renderer
        .add_atlas(TextureAtlas::from_json(SHEET, image.clone()).unwrap())
        .unwrap();

    renderer.draw_region(&image, "gem", 10.0, 20.0).unwrap();
    renderer.flush().unwrap();

    // the renderer's half-texel inset applies to registered atlases
    let uvs = uploaded_uvs(&log);
    assert_eq!(uvs.len(), 4);
    assert_eq!(uvs[0], [64.5 / 128.0, 32.5 / 64.0]);
    assert_eq!(uvs[3], [79.5 / 128.0, 47.5 / 64.0]);

    let positions: Vec<f32> = log
        .borrow()
        .iter()
        .find_map(|c| match c {
            DeviceCall::UploadVertices(v) => Some(v.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!((positions[0], positions[1]), (10.0, 20.0));
    assert_eq!((positions[24], positions[25]), (26.0, 36.0));
}

#[test]
fn test_unknown_region_name_is_an_error() {
    let mut renderer =
        GpuRenderer::new(RecordingDevice::new(4), RendererConfig::new(32, 32)).unwrap();
    let image = Image::new(128, 64).unwrap();
    renderer
        .add_atlas(TextureAtlas::from_json(SHEET, image.clone()).unwrap())
        .unwrap();
    assert!(matches!(
        renderer.draw_region(&image, "sword", 0.0, 0.0),
        Err(RenderError::RegionNotFound { .. })
    ));
}
