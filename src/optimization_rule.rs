use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::{Document, Node};

/// Target buses/models that the rules upgrade away from.
const LEGACY_DISK_BUSES: [&str; 3] = ["ide", "sata", "scsi"];
const LEGACY_NIC_MODELS: [&str; 3] = ["rtl8139", "e1000", "e1000e"];
const LEGACY_VIDEO_MODELS: [&str; 3] = ["qxl", "vga", "cirrus"];

/// Render node used when SPICE GL is enabled without one configured.
pub const DEFAULT_RENDER_NODE: &str = "/dev/dri/renderD128";

/// Identifies which optimization fired. Keys are stable and appear verbatim
/// in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKey {
    DiskBus,
    DiskCache,
    NicModel,
    VideoModel,
    VideoAccel,
    SpiceGl,
    CpuMode,
    CpuTopology,
}

impl RuleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKey::DiskBus => "disk_bus",
            RuleKey::DiskCache => "disk_cache",
            RuleKey::NicModel => "nic_model",
            RuleKey::VideoModel => "video_model",
            RuleKey::VideoAccel => "video_accel",
            RuleKey::SpiceGl => "spice_gl",
            RuleKey::CpuMode => "cpu_mode",
            RuleKey::CpuTopology => "cpu_topology",
        }
    }

    /// One-line summary shown next to each change in reports.
    pub fn description(&self) -> &'static str {
        match self {
            RuleKey::DiskBus => "Disk bus: IDE/SATA → VirtIO",
            RuleKey::DiskCache => "Disk cache: → writeback + discard=unmap + io=threads",
            RuleKey::NicModel => "NIC model: rtl8139/e1000 → VirtIO",
            RuleKey::VideoModel => "Video: QXL/VGA → VirtIO-GPU",
            RuleKey::VideoAccel => "3D acceleration: Enable",
            RuleKey::SpiceGl => "SPICE GL: Enable with rendernode",
            RuleKey::CpuMode => "CPU mode: → host-passthrough",
            RuleKey::CpuTopology => "CPU topology: Add cores/threads layout",
        }
    }

    /// Longer rationale shown below the summary.
    pub fn detail(&self) -> &'static str {
        match self {
            RuleKey::DiskBus => {
                "VirtIO disk provides ~3x throughput, lower CPU overhead, TRIM support"
            }
            RuleKey::DiskCache => "Improves write performance and enables SSD TRIM passthrough",
            RuleKey::NicModel => "VirtIO NIC provides ~10x throughput, lower latency",
            RuleKey::VideoModel => "Better Wayland support, enables 3D acceleration",
            RuleKey::VideoAccel => "Hardware-accelerated graphics via host GPU",
            RuleKey::SpiceGl => "GPU passthrough for display, reduces CPU usage",
            RuleKey::CpuMode => "Exposes full host CPU features to guest",
            RuleKey::CpuTopology => "Helps guest scheduler optimize thread placement",
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one applied rule outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub rule: RuleKey,
    pub before: String,
    pub after: String,
}

impl ChangeRecord {
    pub fn new(rule: RuleKey, before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            rule,
            before: before.into(),
            after: after.into(),
        }
    }
}

/// The closed set of optimization rules. Each variant is an idempotent
/// check-and-mutate step over the descriptor tree; a rule that finds nothing
/// to do returns no records and leaves the tree untouched. Nodes missing an
/// expected child or attribute are skipped, never treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationRule {
    DiskBus,
    DiskCache,
    NicModel,
    VideoModel,
    VideoAccel,
    SpiceGl,
    CpuMode,
    CpuTopology,
}

/// Execution order is part of the contract: later rules observe earlier
/// rules' mutations within the same pass (cpu_topology relies on cpu_mode
/// having created the cpu node).
pub const RULE_SET: [OptimizationRule; 8] = [
    OptimizationRule::DiskBus,
    OptimizationRule::DiskCache,
    OptimizationRule::NicModel,
    OptimizationRule::VideoModel,
    OptimizationRule::VideoAccel,
    OptimizationRule::SpiceGl,
    OptimizationRule::CpuMode,
    OptimizationRule::CpuTopology,
];

impl OptimizationRule {
    pub fn key(&self) -> RuleKey {
        match self {
            OptimizationRule::DiskBus => RuleKey::DiskBus,
            OptimizationRule::DiskCache => RuleKey::DiskCache,
            OptimizationRule::NicModel => RuleKey::NicModel,
            OptimizationRule::VideoModel => RuleKey::VideoModel,
            OptimizationRule::VideoAccel => RuleKey::VideoAccel,
            OptimizationRule::SpiceGl => RuleKey::SpiceGl,
            OptimizationRule::CpuMode => RuleKey::CpuMode,
            OptimizationRule::CpuTopology => RuleKey::CpuTopology,
        }
    }

    /// Applies the rule to the whole document, returning records in document
    /// traversal order.
    pub fn apply(&self, document: &mut Document) -> Vec<ChangeRecord> {
        match self {
            OptimizationRule::DiskBus => apply_disk_bus(document),
            OptimizationRule::DiskCache => apply_disk_cache(document),
            OptimizationRule::NicModel => apply_nic_model(document),
            OptimizationRule::VideoModel => apply_video_model(document),
            OptimizationRule::VideoAccel => apply_video_accel(document),
            OptimizationRule::SpiceGl => apply_spice_gl(document),
            OptimizationRule::CpuMode => apply_cpu_mode(document),
            OptimizationRule::CpuTopology => apply_cpu_topology(document),
        }
    }
}

fn is_fixed_disk(node: &Node) -> bool {
    node.tag == "disk" && node.attr("device") == Some("disk")
}

fn apply_disk_bus(document: &mut Document) -> Vec<ChangeRecord> {
    let dev_prefix = Regex::new(r"^[hs]d").unwrap();
    let mut changes = Vec::new();

    document.root.visit_mut(&mut |node| {
        if !is_fixed_disk(node) {
            return;
        }
        let Some(target) = node.find_child_mut("target") else {
            return;
        };
        // A target with no bus at all is deliberately left alone.
        let Some(old_bus) = target.attr("bus").map(str::to_owned) else {
            return;
        };
        if !LEGACY_DISK_BUSES.contains(&old_bus.as_str()) {
            return;
        }

        target.set_attr("bus", "virtio");

        let old_dev = target.attr("dev").unwrap_or("").to_owned();
        let new_dev = dev_prefix.replace(&old_dev, "vd").into_owned();
        if !old_dev.is_empty() {
            target.set_attr("dev", new_dev.as_str());
        }

        changes.push(ChangeRecord::new(
            RuleKey::DiskBus,
            format!("{old_bus} ({old_dev})"),
            format!("virtio ({new_dev})"),
        ));
    });

    changes
}

fn apply_disk_cache(document: &mut Document) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();

    document.root.visit_mut(&mut |node| {
        if !is_fixed_disk(node) {
            return;
        }
        let Some(driver) = node.find_child_mut("driver") else {
            return;
        };

        let old_cache = driver.attr("cache").unwrap_or("default").to_owned();
        let old_discard = driver.attr("discard").unwrap_or("none").to_owned();
        let old_io = driver.attr("io").unwrap_or("default").to_owned();

        if old_cache == "writeback" && old_discard == "unmap" && old_io == "threads" {
            return;
        }

        driver.set_attr("cache", "writeback");
        driver.set_attr("discard", "unmap");
        driver.set_attr("io", "threads");

        changes.push(ChangeRecord::new(
            RuleKey::DiskCache,
            format!("cache={old_cache}, discard={old_discard}, io={old_io}"),
            "cache=writeback, discard=unmap, io=threads",
        ));
    });

    changes
}

fn apply_nic_model(document: &mut Document) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();

    document.root.visit_mut(&mut |node| {
        if node.tag != "interface" {
            return;
        }
        let Some(model) = node.find_child_mut("model") else {
            return;
        };
        let Some(old_type) = model.attr("type").map(str::to_owned) else {
            return;
        };
        if !LEGACY_NIC_MODELS.contains(&old_type.as_str()) {
            return;
        }

        model.set_attr("type", "virtio");
        changes.push(ChangeRecord::new(RuleKey::NicModel, old_type, "virtio"));
    });

    changes
}

fn apply_video_model(document: &mut Document) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();

    document.root.visit_mut(&mut |node| {
        if node.tag != "video" {
            return;
        }
        let Some(model) = node.find_child_mut("model") else {
            return;
        };
        let Some(old_type) = model.attr("type").map(str::to_owned) else {
            return;
        };
        if !LEGACY_VIDEO_MODELS.contains(&old_type.as_str()) {
            return;
        }

        model.set_attr("type", "virtio");
        model.set_attr("heads", "1");
        model.set_attr("primary", "yes");

        let accel = model.ensure_child("acceleration");
        let old_accel = accel.attr("accel3d").unwrap_or("no").to_owned();
        accel.set_attr("accel3d", "yes");

        changes.push(ChangeRecord::new(RuleKey::VideoModel, old_type, "virtio"));
        if old_accel != "yes" {
            changes.push(ChangeRecord::new(
                RuleKey::VideoAccel,
                format!("accel3d={old_accel}"),
                "accel3d=yes",
            ));
        }
    });

    changes
}

fn apply_video_accel(document: &mut Document) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();

    document.root.visit_mut(&mut |node| {
        if node.tag != "video" {
            return;
        }
        let Some(model) = node.find_child_mut("model") else {
            return;
        };
        let Some(accel) = model.find_child_mut("acceleration") else {
            return;
        };

        let old_accel = accel.attr("accel3d").unwrap_or("no").to_owned();
        if old_accel == "yes" {
            return;
        }

        accel.set_attr("accel3d", "yes");
        changes.push(ChangeRecord::new(
            RuleKey::VideoAccel,
            format!("accel3d={old_accel}"),
            "accel3d=yes",
        ));
    });

    changes
}

fn apply_spice_gl(document: &mut Document) -> Vec<ChangeRecord> {
    let mut changes = Vec::new();

    document.root.visit_mut(&mut |node| {
        if node.tag != "graphics" || node.attr("type") != Some("spice") {
            return;
        }

        let gl = node.ensure_child("gl");
        let old_enable = gl.attr("enable").unwrap_or("no").to_owned();
        if old_enable == "yes" {
            return;
        }

        gl.set_attr("enable", "yes");
        if gl.attr("rendernode").is_none() {
            gl.set_attr("rendernode", DEFAULT_RENDER_NODE);
        }

        changes.push(ChangeRecord::new(
            RuleKey::SpiceGl,
            format!("enable={old_enable}"),
            "enable=yes",
        ));
    });

    changes
}

fn apply_cpu_mode(document: &mut Document) -> Vec<ChangeRecord> {
    let root = &mut document.root;

    if let Some(cpu) = root.find_child_mut("cpu") {
        let old_mode = cpu.attr("mode").unwrap_or("custom").to_owned();
        if old_mode == "host-passthrough" {
            return Vec::new();
        }

        cpu.set_attr("mode", "host-passthrough");
        cpu.set_attr("check", "none");
        cpu.set_attr("migratable", "on");

        vec![ChangeRecord::new(
            RuleKey::CpuMode,
            old_mode,
            "host-passthrough",
        )]
    } else {
        let mut cpu = Node::new("cpu");
        cpu.set_attr("mode", "host-passthrough");
        cpu.set_attr("check", "none");
        cpu.set_attr("migratable", "on");

        // Downstream tooling expects stable node ordering: the cpu node goes
        // right after <vcpu>, falling back to an append when there is none.
        root.insert_after("vcpu", cpu);

        vec![ChangeRecord::new(
            RuleKey::CpuMode,
            "default",
            "host-passthrough",
        )]
    }
}

fn apply_cpu_topology(document: &mut Document) -> Vec<ChangeRecord> {
    let vcpu_count = declared_vcpu_count(&document.root);

    let Some(cpu) = document.root.find_child_mut("cpu") else {
        return Vec::new();
    };
    if cpu.find_child("topology").is_some() {
        return Vec::new();
    }

    let mut topology = Node::new("topology");
    topology.set_attr("sockets", "1");
    topology.set_attr("dies", "1");
    topology.set_attr("clusters", "1");
    topology.set_attr("cores", vcpu_count.to_string());
    topology.set_attr("threads", "1");
    cpu.append_child(topology);

    vec![ChangeRecord::new(
        RuleKey::CpuTopology,
        "none",
        format!("1 socket × {vcpu_count} cores × 1 thread"),
    )]
}

/// Declared vcpu count, defaulting to 1 when the node is absent or its text
/// is not a positive integer.
fn declared_vcpu_count(root: &Node) -> u32 {
    root.find_child("vcpu")
        .and_then(|vcpu| vcpu.text.as_deref())
        .and_then(|text| text.trim().parse::<u32>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(1)
}
