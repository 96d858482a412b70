//! Assigned-number alias names for standard GATT attributes

use super::error::AttributeKind;

/// Looks up the 16-bit assigned number for an alias name
pub fn lookup(kind: AttributeKind, name: &str) -> Option<u16> {
    let table = match kind {
        AttributeKind::Service => SERVICES,
        AttributeKind::Characteristic => CHARACTERISTICS,
        AttributeKind::Descriptor => DESCRIPTORS,
    };
    table
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, number)| *number)
}

const SERVICES: &[(&str, u16)] = &[
    ("alert_notification", 0x1811),
    ("automation_io", 0x1815),
    ("battery_service", 0x180f),
    ("blood_pressure", 0x1810),
    ("body_composition", 0x181b),
    ("bond_management", 0x181e),
    ("continuous_glucose_monitoring", 0x181f),
    ("current_time", 0x1805),
    ("cycling_power", 0x1818),
    ("cycling_speed_and_cadence", 0x1816),
    ("device_information", 0x180a),
    ("environmental_sensing", 0x181a),
    ("generic_access", 0x1800),
    ("generic_attribute", 0x1801),
    ("glucose", 0x1808),
    ("health_thermometer", 0x1809),
    ("heart_rate", 0x180d),
    ("human_interface_device", 0x1812),
    ("immediate_alert", 0x1802),
    ("indoor_positioning", 0x1821),
    ("internet_protocol_support", 0x1820),
    ("link_loss", 0x1803),
    ("location_and_navigation", 0x1819),
    ("next_dst_change", 0x1807),
    ("phone_alert_status", 0x180e),
    ("pulse_oximeter", 0x1822),
    ("reference_time_update", 0x1806),
    ("running_speed_and_cadence", 0x1814),
    ("scan_parameters", 0x1813),
    ("tx_power", 0x1804),
    ("user_data", 0x181c),
    ("weight_scale", 0x181d),
];

const CHARACTERISTICS: &[(&str, u16)] = &[
    ("aerobic_heart_rate_lower_limit", 0x2a7e),
    ("aerobic_heart_rate_upper_limit", 0x2a84),
    ("aerobic_threshold", 0x2a7f),
    ("age", 0x2a80),
    ("aggregate", 0x2a5a),
    ("alert_category_id", 0x2a43),
    ("alert_category_id_bit_mask", 0x2a42),
    ("alert_level", 0x2a06),
    ("alert_notification_control_point", 0x2a44),
    ("alert_status", 0x2a3f),
    ("altitude", 0x2ab3),
    ("anaerobic_heart_rate_lower_limit", 0x2a81),
    ("anaerobic_heart_rate_upper_limit", 0x2a82),
    ("anaerobic_threshold", 0x2a83),
    ("analog", 0x2a58),
    ("apparent_wind_direction", 0x2a73),
    ("apparent_wind_speed", 0x2a72),
    ("gap.appearance", 0x2a01),
    ("barometric_pressure_trend", 0x2aa3),
    ("battery_level", 0x2a19),
    ("blood_pressure_feature", 0x2a49),
    ("blood_pressure_measurement", 0x2a35),
    ("body_composition_feature", 0x2a9b),
    ("body_composition_measurement", 0x2a9c),
    ("body_sensor_location", 0x2a38),
    ("bond_management_control_point", 0x2aa4),
    ("bond_management_feature", 0x2aa5),
    ("boot_keyboard_input_report", 0x2a22),
    ("boot_keyboard_output_report", 0x2a32),
    ("boot_mouse_input_report", 0x2a33),
    ("gap.central_address_resolution_support", 0x2aa6),
    ("cgm_feature", 0x2aa8),
    ("cgm_measurement", 0x2aa7),
    ("cgm_session_run_time", 0x2aab),
    ("cgm_session_start_time", 0x2aaa),
    ("cgm_specific_ops_control_point", 0x2aac),
    ("cgm_status", 0x2aa9),
    ("csc_feature", 0x2a5c),
    ("csc_measurement", 0x2a5b),
    ("current_time", 0x2a2b),
    ("cycling_power_control_point", 0x2a66),
    ("cycling_power_feature", 0x2a65),
    ("cycling_power_measurement", 0x2a63),
    ("cycling_power_vector", 0x2a64),
    ("database_change_increment", 0x2a99),
    ("date_of_birth", 0x2a85),
    ("date_of_threshold_assessment", 0x2a86),
    ("date_time", 0x2a08),
    ("day_date_time", 0x2a0a),
    ("day_of_week", 0x2a09),
    ("descriptor_value_changed", 0x2a7d),
    ("gap.device_name", 0x2a00),
    ("dew_point", 0x2a7b),
    ("digital", 0x2a56),
    ("dst_offset", 0x2a0d),
    ("elevation", 0x2a6c),
    ("email_address", 0x2a87),
    ("exact_time_256", 0x2a0c),
    ("fat_burn_heart_rate_lower_limit", 0x2a88),
    ("fat_burn_heart_rate_upper_limit", 0x2a89),
    ("firmware_revision_string", 0x2a26),
    ("first_name", 0x2a8a),
    ("five_zone_heart_rate_limits", 0x2a8b),
    ("floor_number", 0x2ab2),
    ("gender", 0x2a8c),
    ("glucose_feature", 0x2a51),
    ("glucose_measurement", 0x2a18),
    ("glucose_measurement_context", 0x2a34),
    ("gust_factor", 0x2a74),
    ("hardware_revision_string", 0x2a27),
    ("heart_rate_control_point", 0x2a39),
    ("heart_rate_max", 0x2a8d),
    ("heart_rate_measurement", 0x2a37),
    ("heat_index", 0x2a7a),
    ("height", 0x2a8e),
    ("hid_control_point", 0x2a4c),
    ("hid_information", 0x2a4a),
    ("hip_circumference", 0x2a8f),
    ("humidity", 0x2a6f),
    ("ieee_11073-20601_regulatory_certification_data_list", 0x2a2a),
    ("indoor_positioning_configuration", 0x2aad),
    ("intermediate_blood_pressure", 0x2a36),
    ("intermediate_temperature", 0x2a1e),
    ("irradiance", 0x2a77),
    ("language", 0x2aa2),
    ("last_name", 0x2a90),
    ("latitude", 0x2aae),
    ("ln_control_point", 0x2a6b),
    ("ln_feature", 0x2a6a),
    ("local_east_coordinate.xml", 0x2ab1),
    ("local_north_coordinate", 0x2ab0),
    ("local_time_information", 0x2a0f),
    ("location_and_speed", 0x2a67),
    ("location_name", 0x2ab5),
    ("longitude", 0x2aaf),
    ("magnetic_declination", 0x2a2c),
    ("magnetic_flux_density_2D", 0x2aa0),
    ("magnetic_flux_density_3D", 0x2aa1),
    ("manufacturer_name_string", 0x2a29),
    ("maximum_recommended_heart_rate", 0x2a91),
    ("measurement_interval", 0x2a21),
    ("model_number_string", 0x2a24),
    ("navigation", 0x2a68),
    ("new_alert", 0x2a46),
    ("gap.peripheral_preferred_connection_parameters", 0x2a04),
    ("gap.peripheral_privacy_flag", 0x2a02),
    ("plx_continuous_measurement", 0x2a5f),
    ("plx_features", 0x2a60),
    ("plx_spot_check_measurement", 0x2a5e),
    ("pnp_id", 0x2a50),
    ("pollen_concentration", 0x2a75),
    ("position_quality", 0x2a69),
    ("pressure", 0x2a6d),
    ("protocol_mode", 0x2a4e),
    ("rainfall", 0x2a78),
    ("gap.reconnection_address", 0x2a03),
    ("record_access_control_point", 0x2a52),
    ("reference_time_information", 0x2a14),
    ("report", 0x2a4d),
    ("report_map", 0x2a4b),
    ("resting_heart_rate", 0x2a92),
    ("ringer_control_point", 0x2a40),
    ("ringer_setting", 0x2a41),
    ("rsc_feature", 0x2a54),
    ("rsc_measurement", 0x2a53),
    ("sc_control_point", 0x2a55),
    ("scan_interval_window", 0x2a4f),
    ("scan_refresh", 0x2a31),
    ("sensor_location", 0x2a5d),
    ("serial_number_string", 0x2a25),
    ("gatt.service_changed", 0x2a05),
    ("software_revision_string", 0x2a28),
    ("sport_type_for_aerobic_and_anaerobic_thresholds", 0x2a93),
    ("supported_new_alert_category", 0x2a47),
    ("supported_unread_alert_category", 0x2a48),
    ("system_id", 0x2a23),
    ("temperature", 0x2a6e),
    ("temperature_measurement", 0x2a1c),
    ("temperature_type", 0x2a1d),
    ("three_zone_heart_rate_limits", 0x2a94),
    ("time_accuracy", 0x2a12),
    ("time_source", 0x2a13),
    ("time_update_control_point", 0x2a16),
    ("time_update_state", 0x2a17),
    ("time_with_dst", 0x2a11),
    ("time_zone", 0x2a0e),
    ("true_wind_direction", 0x2a71),
    ("true_wind_speed", 0x2a70),
    ("two_zone_heart_rate_limit", 0x2a95),
    ("tx_power_level", 0x2a07),
    ("uncertainty", 0x2ab4),
    ("unread_alert_status", 0x2a45),
    ("user_control_point", 0x2a9f),
    ("user_index", 0x2a9a),
    ("uv_index", 0x2a76),
    ("vo2_max", 0x2a96),
    ("waist_circumference", 0x2a97),
    ("weight", 0x2a98),
    ("weight_measurement", 0x2a9d),
    ("weight_scale_feature", 0x2a9e),
    ("wind_chill", 0x2a79),
];

const DESCRIPTORS: &[(&str, u16)] = &[
    ("gatt.characteristic_extended_properties", 0x2900),
    ("gatt.characteristic_user_description", 0x2901),
    ("gatt.client_characteristic_configuration", 0x2902),
    ("gatt.server_characteristic_configuration", 0x2903),
    ("gatt.characteristic_presentation_format", 0x2904),
    ("gatt.characteristic_aggregate_format", 0x2905),
    ("valid_range", 0x2906),
    ("external_report_reference", 0x2907),
    ("report_reference", 0x2908),
    ("number_of_digitals", 0x2909),
    ("value_trigger_setting", 0x290a),
    ("es_configuration", 0x290b),
    ("es_measurement", 0x290c),
    ("es_trigger_setting", 0x290d),
    ("time_trigger_setting", 0x290e),
];
