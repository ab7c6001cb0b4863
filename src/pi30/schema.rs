//! Response layouts, one per command.
//!
//! Field order and types follow the PI30 protocol document. Adding a command
//! means adding a table entry here; the decoder and coordinator are driven
//! entirely by the registry.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Int,
    /// Passed through untouched, eg status bit-strings.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn float(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Float }
}

const fn int(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Int }
}

const fn raw(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Raw }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Whitespace-separated tokens at fixed positions.
    Fields(&'static [FieldSpec]),
    /// The whole payload is one value.
    Whole(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub command: &'static str,
    pub subtopic: &'static str,
    pub layout: Layout,
    /// Only polled when debug commands are enabled.
    pub debug: bool,
}

impl Schema {
    /// Minimum number of tokens a response must carry.
    pub fn min_fields(&self) -> usize {
        match self.layout {
            Layout::Fields(fields) => fields.len(),
            Layout::Whole(_) => 1,
        }
    }
}

const QPIGS: &[FieldSpec] = &[
    float("GridVoltage"),
    float("GridFrequency"),
    float("ACOutputVoltage"),
    float("ACOutputFrequency"),
    int("ACOutputApparentPower"),
    int("ACOutputActivePower"),
    int("OutputLoadPercent"),
    int("BUSVoltage"),
    float("BatteryVoltage"),
    int("BatteryChargingCurrent"),
    int("BatteryCapacity"),
    int("InverterHeatSinkTemp"),
    float("PV1InputCurrent"),
    float("PV1InputVoltage"),
    float("BatteryVoltageFromSCC"),
    int("BatteryDischargeCurrent"),
    raw("DeviceStatus1"),
    int("BatteryVOffsetForFansOn"),
    int("EEPROMVersion"),
    int("PV1ChargingPower"),
    raw("DeviceStatus2"),
];

const QPIRI: &[FieldSpec] = &[
    float("GridRatingVoltage"),
    float("GridRatingCurrent"),
    float("ACOutputRatingVoltage"),
    float("ACOutputRatingFrequency"),
    float("ACOutputRatingCurrent"),
    int("ACOutputRatingApparentPower"),
    int("ACOutputRatingActivePower"),
    float("BatteryRatingVoltage"),
    float("BatteryRechargeVoltage"),
    float("BatteryUnderVoltage"),
    float("BatteryBulkVoltage"),
    float("BatteryFloatVoltage"),
    int("BatteryType"),
    int("MaxACChargingCurrent"),
    int("MaxChargingCurrent"),
    int("InputVoltageRange"),
    int("OutputSourcePriority"),
    int("ChargerSourcePriority"),
    int("ParallelMaxNumber"),
    int("MachineType"),
    int("Topology"),
    int("OutputMode"),
    float("BatteryRedischargeVoltage"),
    int("PVOKConditionForParallel"),
    int("PVPowerBalance"),
    int("MaxChargingTimeAtCVStage"),
    int("OperationLogic"),
    int("MaxDischargingCurrent"),
];

const QPIGS2: &[FieldSpec] = &[
    float("PV2InputCurrent"),
    float("PV2InputVoltage"),
    int("PV2ChargingPower"),
];

const QPI: &[FieldSpec] = &[raw("ProtocolId")];
const QID: &[FieldSpec] = &[raw("SerialNumber")];
const QVFW: &[FieldSpec] = &[raw("FirmwareVersion")];
const QMOD: &[FieldSpec] = &[raw("DeviceMode")];

const SCHEMAS: &[Schema] = &[
    Schema {
        command: "QPIGS",
        subtopic: "state",
        layout: Layout::Fields(QPIGS),
        debug: false,
    },
    Schema {
        command: "QPIRI",
        subtopic: "rating",
        layout: Layout::Fields(QPIRI),
        debug: false,
    },
    Schema {
        command: "QPIGS2",
        subtopic: "pv2",
        layout: Layout::Fields(QPIGS2),
        debug: false,
    },
    Schema {
        command: "QPIWS",
        subtopic: "warnings",
        layout: Layout::Whole("WarningFlags"),
        debug: false,
    },
    // debug set
    Schema {
        command: "QPI",
        subtopic: "protocol",
        layout: Layout::Fields(QPI),
        debug: true,
    },
    Schema {
        command: "QID",
        subtopic: "serial",
        layout: Layout::Fields(QID),
        debug: true,
    },
    Schema {
        command: "QVFW",
        subtopic: "firmware",
        layout: Layout::Fields(QVFW),
        debug: true,
    },
    Schema {
        command: "QMOD",
        subtopic: "mode",
        layout: Layout::Fields(QMOD),
        debug: true,
    },
    Schema {
        command: "QFLAG",
        subtopic: "flags",
        layout: Layout::Whole("Flags"),
        debug: true,
    },
];

/// Immutable command name -> schema lookup, built once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    by_command: HashMap<&'static str, &'static Schema>,
    order: Vec<&'static Schema>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Every known schema, debug ones included.
    pub fn new() -> Self {
        Self::from_schemas(SCHEMAS.iter())
    }

    fn from_schemas(schemas: impl Iterator<Item = &'static Schema>) -> Self {
        let order: Vec<_> = schemas.collect();
        let by_command = order.iter().map(|s| (s.command, *s)).collect();
        Self { by_command, order }
    }

    pub fn get(&self, command: &str) -> Option<&'static Schema> {
        self.by_command.get(command).copied()
    }

    /// Commands to poll each cycle, in registration order.
    pub fn poll_list(&self, debug: bool) -> Vec<&'static Schema> {
        self.order
            .iter()
            .filter(|s| debug || !s.debug)
            .copied()
            .collect()
    }
}
