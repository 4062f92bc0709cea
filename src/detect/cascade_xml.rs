//! Reader for OpenCV's XML cascade files (`<opencv_storage>`).
//!
//! Two layouts exist in the wild:
//!
//! * `type_id="opencv-cascade-classifier"`: the current layout (`<cascade>` with
//!   `stageType`, `featureType`, `width`/`height`, `stages` and a shared
//!   `features` table referenced by index from each weak classifier's
//!   `internalNodes`);
//! * `type_id="opencv-haar-classifier"`: the legacy layout (`<size>`, and each
//!   stage holds `trees` whose nodes embed their `feature`).
//!
//! Both are mapped onto [`CascadeModel`]. Only upright Haar features and
//! single-split weak classifiers (stumps) are supported, which covers the
//! frontal-face cascades OpenCV ships.

use anyhow::{anyhow, Context, Result};
use roxmltree::{Document, Node};

use crate::detect::cascade::{CascadeModel, CascadeStage, HaarStump, WeightedRect};

/// OpenCV lowers every stage threshold by this much when loading.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

const CURRENT_TYPE_ID: &str = "opencv-cascade-classifier";
const LEGACY_TYPE_ID: &str = "opencv-haar-classifier";

pub(crate) fn parse_opencv_cascade(xml: &str) -> Result<CascadeModel> {
    let doc = Document::parse(xml).context("cascade is not well-formed XML")?;
    let storage = doc.root_element();
    if storage.tag_name().name() != "opencv_storage" {
        return Err(anyhow!(
            "expected <opencv_storage>, found <{}>",
            storage.tag_name().name()
        ));
    }
    let cascade = elements(storage)
        .next()
        .ok_or_else(|| anyhow!("<opencv_storage> is empty"))?;

    let model = match cascade.attribute("type_id") {
        Some(CURRENT_TYPE_ID) => parse_current(cascade)?,
        Some(LEGACY_TYPE_ID) => parse_legacy(cascade)?,
        None if cascade.tag_name().name() == "cascade" => parse_current(cascade)?,
        other => {
            return Err(anyhow!(
                "unsupported cascade type {:?} in <{}>",
                other,
                cascade.tag_name().name()
            ))
        }
    };
    model.validate()?;
    Ok(model)
}

// ----------------------------------------------------------------------------
// Current layout
// ----------------------------------------------------------------------------

fn parse_current(cascade: Node) -> Result<CascadeModel> {
    let stage_type = text(child(cascade, "stageType")?)?;
    if stage_type != "BOOST" {
        return Err(anyhow!("unsupported stageType '{}'", stage_type));
    }
    let feature_type = text(child(cascade, "featureType")?)?;
    if feature_type != "HAAR" {
        return Err(anyhow!(
            "unsupported featureType '{}' (only HAAR cascades are supported)",
            feature_type
        ));
    }
    let window_width: u32 = parse_one(child(cascade, "width")?)?;
    let window_height: u32 = parse_one(child(cascade, "height")?)?;

    let features = elements(child(cascade, "features")?)
        .enumerate()
        .map(|(i, feature)| {
            if is_tilted(feature)? {
                return Err(anyhow!("feature {}: tilted Haar features are not supported", i));
            }
            parse_rects(child(feature, "rects")?).with_context(|| format!("feature {}", i))
        })
        .collect::<Result<Vec<_>>>()?;

    let stages = elements(child(cascade, "stages")?)
        .enumerate()
        .map(|(s, stage)| {
            let threshold: f64 = parse_one(child(stage, "stageThreshold")?)?;
            let stumps = elements(child(stage, "weakClassifiers")?)
                .map(|weak| current_stump(weak, &features))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("stage {}", s))?;
            Ok(CascadeStage {
                threshold: threshold - STAGE_THRESHOLD_EPS,
                stumps,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(declared) = optional_child(cascade, "stageNum") {
        let declared: usize = parse_one(declared)?;
        if declared != stages.len() {
            return Err(anyhow!(
                "stageNum says {} stages, found {}",
                declared,
                stages.len()
            ));
        }
    }

    Ok(CascadeModel {
        window_width,
        window_height,
        stages,
    })
}

/// `internalNodes` is `left right feature threshold` per node; child values
/// `<= 0` name a leaf (`-value`) in `leafValues`.
fn current_stump(weak: Node, features: &[Vec<WeightedRect>]) -> Result<HaarStump> {
    let nodes: Vec<f64> = parse_list(child(weak, "internalNodes")?)?;
    let leaves: Vec<f64> = parse_list(child(weak, "leafValues")?)?;
    if nodes.len() != 4 {
        return Err(anyhow!(
            "weak classifier has {} split values; only single-split stumps are supported",
            nodes.len()
        ));
    }
    let leaf = |value: f64| -> Result<f64> {
        if value > 0.0 {
            return Err(anyhow!("weak classifier has more than one split"));
        }
        leaves
            .get((-value) as usize)
            .copied()
            .ok_or_else(|| anyhow!("leaf index {} out of range", -value))
    };
    let feature = nodes[2];
    let rects = features
        .get(feature as usize)
        .filter(|_| feature >= 0.0)
        .ok_or_else(|| anyhow!("feature index {} out of range", feature))?;
    Ok(HaarStump {
        rects: rects.clone(),
        threshold: nodes[3],
        left: leaf(nodes[0])?,
        right: leaf(nodes[1])?,
    })
}

// ----------------------------------------------------------------------------
// Legacy layout
// ----------------------------------------------------------------------------

fn parse_legacy(cascade: Node) -> Result<CascadeModel> {
    let size: Vec<u32> = parse_list(child(cascade, "size")?)?;
    let [window_width, window_height] = size[..] else {
        return Err(anyhow!("<size> must hold width and height"));
    };

    let stages = elements(child(cascade, "stages")?)
        .enumerate()
        .map(|(s, stage)| {
            let threshold: f64 = parse_one(child(stage, "stage_threshold")?)?;
            let stumps = elements(child(stage, "trees")?)
                .map(legacy_stump)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("stage {}", s))?;
            Ok(CascadeStage {
                threshold: threshold - STAGE_THRESHOLD_EPS,
                stumps,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CascadeModel {
        window_width,
        window_height,
        stages,
    })
}

fn legacy_stump(tree: Node) -> Result<HaarStump> {
    let mut nodes = elements(tree);
    let node = nodes.next().ok_or_else(|| anyhow!("empty tree"))?;
    if nodes.next().is_some() {
        return Err(anyhow!("only single-node trees are supported"));
    }
    let feature = child(node, "feature")?;
    if is_tilted(feature)? {
        return Err(anyhow!("tilted Haar features are not supported"));
    }
    Ok(HaarStump {
        rects: parse_rects(child(feature, "rects")?)?,
        threshold: parse_one(child(node, "threshold")?)?,
        left: parse_one(child(node, "left_val")?)?,
        right: parse_one(child(node, "right_val")?)?,
    })
}

// ----------------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------------

/// Each `<_>` is `x y width height weight`.
fn parse_rects(rects: Node) -> Result<Vec<WeightedRect>> {
    elements(rects)
        .map(|rect| {
            let fields: Vec<&str> = text(rect)?.split_whitespace().collect();
            let [x, y, width, height, weight] = fields[..] else {
                return Err(anyhow!("rectangle needs 5 values, got {}", fields.len()));
            };
            Ok(WeightedRect {
                x: parse_field(x)?,
                y: parse_field(y)?,
                width: parse_field(width)?,
                height: parse_field(height)?,
                weight: parse_field(weight)?,
            })
        })
        .collect()
}

fn is_tilted(feature: Node) -> Result<bool> {
    match optional_child(feature, "tilted") {
        Some(node) => Ok(parse_one::<i32>(node)? != 0),
        None => Ok(false),
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn optional_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    optional_child(node, name)
        .ok_or_else(|| anyhow!("<{}> has no <{}>", node.tag_name().name(), name))
}

fn text<'a>(node: Node<'a, '_>) -> Result<&'a str> {
    node.text()
        .map(str::trim)
        .ok_or_else(|| anyhow!("<{}> is empty", node.tag_name().name()))
}

fn parse_field<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid number '{}'", value))
}

fn parse_one<T: std::str::FromStr>(node: Node) -> Result<T> {
    parse_field(text(node)?).with_context(|| format!("in <{}>", node.tag_name().name()))
}

fn parse_list<T: std::str::FromStr>(node: Node) -> Result<Vec<T>> {
    text(node)?
        .split_whitespace()
        .map(parse_field)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("in <{}>", node.tag_name().name()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-stage frontal-face style cascade in OpenCV's current layout,
    /// including the comments and whitespace stock files carry.
    pub(crate) const CURRENT_LAYOUT: &str = r#"<?xml version="1.0"?>
<!--
    Stump-based 24x24 discrete(?) adaboost frontal face detector.
-->
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageParams>
    <maxWeakCount>2</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>2</stageNum>
  <stages>
    <_>
      <maxWeakCount>2</maxWeakCount>
      <stageThreshold>-5.0425500869750977e-01</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 -3.1511999666690826e-02</internalNodes>
          <leafValues>
            2.0875380039215088e+00 -2.2172100543975830e+00</leafValues></_>
        <_>
          <internalNodes>
            0 -1 1 1.2396000325679779e-02</internalNodes>
          <leafValues>
            -1.8633940219879150e+00 1.3272049427032471e+00</leafValues></_></weakClassifiers></_>
    <!-- stage 1 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>-4.9842400550842285e+00</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 2 2.1927999332547188e-02</internalNodes>
          <leafValues>
            -2.2435649633407593e+00 1.1906809806823730e+00</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          6 4 12 9 -1.</_>
        <_>
          6 7 12 3 3.</_></rects></_>
    <_>
      <rects>
        <_>
          6 4 12 7 -1.</_>
        <_>
          10 4 4 7 3.</_></rects></_>
    <_>
      <rects>
        <_>
          3 9 18 9 -1.</_>
        <_>
          3 12 18 3 3.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

    pub(crate) const LEGACY_LAYOUT: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<haarcascade_frontalface_alt type_id="opencv-haar-classifier">
  <size>20 20</size>
  <stages>
    <_>
      <!-- stage 0 -->
      <trees>
        <_>
          <!-- tree 0 -->
          <_>
            <!-- root node -->
            <feature>
              <rects>
                <_>3 7 14 4 -1.</_>
                <_>3 9 14 2 2.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>4.0141958743333817e-03</threshold>
            <left_val>0.0337941907346249</left_val>
            <right_val>0.8378106951713562</right_val></_></_>
        <_>
          <!-- tree 1 -->
          <_>
            <!-- root node -->
            <feature>
              <rects>
                <_>1 2 18 4 -1.</_>
                <_>7 2 6 4 3.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>0.0151513395830989</threshold>
            <left_val>0.1514132022857666</left_val>
            <right_val>0.7488812208175659</right_val></_></_></trees>
      <stage_threshold>0.8226894140243530</stage_threshold>
      <parent>-1</parent>
      <next>-1</next></_></stages></haarcascade_frontalface_alt>
</opencv_storage>
"#;

    #[test]
    fn reads_current_layout() -> Result<()> {
        let model = parse_opencv_cascade(CURRENT_LAYOUT)?;
        assert_eq!((model.window_width, model.window_height), (24, 24));
        assert_eq!(model.stages.len(), 2);
        assert_eq!(model.stages[0].stumps.len(), 2);

        let first = &model.stages[0].stumps[0];
        assert_eq!(first.rects.len(), 2);
        assert_eq!(
            (first.rects[1].x, first.rects[1].y, first.rects[1].width, first.rects[1].height),
            (6, 7, 12, 3)
        );
        assert_eq!(first.rects[1].weight, 3.0);
        assert!((first.threshold + 0.031512).abs() < 1e-6);
        assert!((first.left - 2.087538).abs() < 1e-6);
        assert!((first.right + 2.21721).abs() < 1e-6);

        // Stumps pick their rectangles from the shared feature table.
        assert_eq!(model.stages[1].stumps[0].rects[0].width, 18);
        assert!((model.stages[0].threshold + 0.504265).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn reads_legacy_layout() -> Result<()> {
        let model = parse_opencv_cascade(LEGACY_LAYOUT)?;
        assert_eq!((model.window_width, model.window_height), (20, 20));
        assert_eq!(model.stages.len(), 1);
        let stumps = &model.stages[0].stumps;
        assert_eq!(stumps.len(), 2);
        assert_eq!(stumps[1].rects[1].x, 7);
        assert!((stumps[1].right - 0.748881).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn rejects_what_the_evaluator_cannot_run() {
        let lbp = CURRENT_LAYOUT.replace(
            "<featureType>HAAR</featureType>",
            "<featureType>LBP</featureType>",
        );
        assert!(parse_opencv_cascade(&lbp).is_err());

        let tilted = CURRENT_LAYOUT.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        assert!(parse_opencv_cascade(&tilted).is_err());

        let tree = CURRENT_LAYOUT.replace(
            "0 -1 0 -3.1511999666690826e-02",
            "1 -1 0 -3.1511999666690826e-02 0 -2 1 0.5",
        );
        assert!(parse_opencv_cascade(&tree).is_err());

        let bad_feature = CURRENT_LAYOUT.replace("0 -1 2 2.19", "0 -1 9 2.19");
        assert!(parse_opencv_cascade(&bad_feature).is_err());

        assert!(parse_opencv_cascade("<opencv_storage>").is_err());
        assert!(parse_opencv_cascade("<storage><cascade/></storage>").is_err());
    }
}
