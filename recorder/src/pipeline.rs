//! Fixed DeepStream element chain, rendered for the vendor runtime.

use anyhow::{bail, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const RTSP_SERVICE_PORT: u16 = 8554;
pub const RTSP_MOUNT: &str = "/ds-feed";
pub const UDP_PORT: u16 = 5400;
pub const ENCODER_BITRATE: u32 = 4_000_000;
pub const FRAME_WIDTH: u32 = 1280;
pub const FRAME_HEIGHT: u32 = 720;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub factory: &'static str,
    pub name: &'static str,
    pub properties: Vec<(&'static str, String)>,
}

impl Element {
    fn new(factory: &'static str, name: &'static str) -> Self {
        Self {
            factory,
            name,
            properties: Vec::new(),
        }
    }

    fn prop(mut self, key: &'static str, value: impl ToString) -> Self {
        self.properties.push((key, value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub device: PathBuf,
    pub elements: Vec<Element>,
}

impl PipelineSpec {
    /// Camera → mux → nvinfer → OSD → H.264 → RTP over UDP.
    /// The metadata probe sits on the OSD sink pad.
    pub fn camera(device: &Path, pgie_config: &Path) -> Self {
        let caps_raw = format!(
            "video/x-raw, framerate=30/1, width={FRAME_WIDTH}, height={FRAME_HEIGHT}"
        );
        let elements = vec![
            Element::new("v4l2src", "usb-cam-source").prop("device", device.display()),
            Element::new("capsfilter", "v4l2src_caps").prop("caps", caps_raw),
            Element::new("videoconvert", "convertor_src1"),
            Element::new("nvvideoconvert", "convertor_src2"),
            Element::new("capsfilter", "nvmm_caps").prop("caps", "video/x-raw(memory:NVMM)"),
            Element::new("nvstreammux", "Stream-muxer")
                .prop("width", FRAME_WIDTH)
                .prop("height", FRAME_HEIGHT)
                .prop("batch-size", 1),
            Element::new("nvinfer", "primary-inference")
                .prop("config-file-path", pgie_config.display()),
            Element::new("nvvideoconvert", "convertor"),
            Element::new("nvdsosd", "onscreendisplay"),
            Element::new("nvvideoconvert", "transform"),
            Element::new("nvv4l2h264enc", "encoder").prop("bitrate", ENCODER_BITRATE),
            Element::new("rtph264pay", "rtppay"),
            Element::new("udpsink", "udpsink")
                .prop("host", "0.0.0.0")
                .prop("port", UDP_PORT)
                .prop("sync", false),
        ];
        Self {
            device: device.to_path_buf(),
            elements,
        }
    }

    /// Fails fast on what would otherwise surface later as a link error.
    pub fn validate(&self) -> Result<()> {
        if !self.device.exists() {
            bail!("camera device {} does not exist", self.device.display());
        }
        let mut names = std::collections::HashSet::new();
        for element in &self.elements {
            if !names.insert(element.name) {
                bail!("duplicate element name {:?}", element.name);
            }
        }
        Ok(())
    }

    /// gst-launch style description. The mux is fed through its `sink_0`
    /// request pad.
    pub fn launch_description(&self) -> String {
        let mut out = String::new();
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                if element.factory == "nvstreammux" {
                    let _ = write!(out, " ! {}.sink_0 ", element.name);
                    out.push_str(&render_element(element));
                    continue;
                }
                out.push_str(" ! ");
            }
            out.push_str(&render_element(element));
        }
        out
    }

    pub fn probe_element(&self) -> &'static str {
        "onscreendisplay"
    }
}

fn render_element(element: &Element) -> String {
    let mut out = format!("{} name={}", element.factory, element.name);
    for (key, value) in &element.properties {
        if value.contains([' ', ',', '(']) {
            let _ = write!(out, " {key}=\"{value}\"");
        } else {
            let _ = write!(out, " {key}={value}");
        }
    }
    out
}

/// Launch line of the RTSP relay that re-serves the UDP RTP stream.
pub fn rtsp_relay_launch() -> String {
    format!(
        "( udpsrc port={UDP_PORT} caps = \"application/x-rtp, media=(string)video, \
         clock-rate=(int)90000, encoding-name=(string)H264, payload=(int)96\" )"
    )
}

pub fn rtsp_url() -> String {
    format!("rtsp://localhost:{RTSP_SERVICE_PORT}{RTSP_MOUNT}")
}
