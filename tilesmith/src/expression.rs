//! Evaluate MapLibre style expressions and legacy filters.
//! <https://maplibre.org/maplibre-style-spec/expressions/>

use crate::vector_tile::GeomType;
use color::{AlphaColor, HueDirection, Srgb};
use serde_json::{Number, Value};

/// Feature properties, as carried through the whole pipeline.
pub type Properties = serde_json::Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid expression: {0}")]
    InvalidExpression(Value),
    #[error("Unknown expression operator: '{0}'")]
    UnknownOperator(String),
    #[error("Expected a property name or an expression, got: {0}")]
    ExpectedKeyOrExpression(Value),
    #[error("Interpolate stop not found for input value: {0}. Expression: {1}")]
    InterpolateStopNotFound(Value, Value),
    #[error("Cannot interpolate between values: {0} and {1}")]
    CannotInterpolate(Value, Value),
    #[error("Single string expected, got: {0:?}")]
    SingleStringExpected(Vec<Value>),
    #[error("Single array expected, got: {0:?}")]
    SingleArrayExpected(Vec<Value>),
    #[error("Single value expected, got: {0:?}")]
    SingleValueExpected(Vec<Value>),
    #[error("Exactly two elements expected, got: {0:?}")]
    TwoElementsExpected(Vec<Value>),
    #[error("At least two elements expected, got: {0:?}")]
    AtLeastTwoElementsExpected(Vec<Value>),
    #[error("No branch of {0} matched and no fallback was given")]
    NoFallback(Value),
    #[error("Value must be a number, got: {0}")]
    ExpectedNumber(Value),
    #[error("Number must be a float, got: {0}")]
    ExpectedFloat(Number),
    #[error("Could not serialize a float. Is it NaN?")]
    CouldNotSerializeFloat,
    #[error(transparent)]
    ColorParse(color::ParseError),
}

/// Everything an expression can look at while evaluated for a single feature.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub zoom: f64,
    pub properties: &'a Properties,
    pub id: Option<&'a Value>,
    pub geometry_type: Option<GeomType>,
    /// Value accumulated so far by a cluster reduce expression.
    pub accumulated: Option<&'a Value>,
    /// Images the map can draw. Unknown images resolve to null when set.
    pub available_images: Option<&'a [String]>,
}

impl<'a> Context<'a> {
    pub fn new(zoom: f64, properties: &'a Properties) -> Self {
        Self {
            zoom,
            properties,
            id: None,
            geometry_type: None,
            accumulated: None,
            available_images: None,
        }
    }

    pub fn with_id(self, id: Option<&'a Value>) -> Self {
        Self { id, ..self }
    }

    pub fn with_geometry_type(self, geometry_type: GeomType) -> Self {
        Self {
            geometry_type: Some(geometry_type),
            ..self
        }
    }

    pub fn with_accumulated(self, accumulated: &'a Value) -> Self {
        Self {
            accumulated: Some(accumulated),
            ..self
        }
    }

    pub fn with_available_images(self, available_images: &'a [String]) -> Self {
        Self {
            available_images: Some(available_images),
            ..self
        }
    }
}

const OPERATORS: &[&str] = &[
    "zoom",
    "literal",
    "!",
    "get",
    "has",
    "!has",
    "id",
    "properties",
    "geometry-type",
    "accumulated",
    "image",
    "match",
    "case",
    "coalesce",
    "in",
    "!in",
    "==",
    "!=",
    "<",
    "<=",
    ">",
    ">=",
    "any",
    "all",
    "none",
    "interpolate",
    "step",
    "format",
    "concat",
    "to-string",
    "to-number",
    "to-boolean",
    "downcase",
    "upcase",
    "+",
    "-",
    "*",
    "/",
    "%",
    "^",
    "min",
    "max",
];

/// Expression validated up front, so that malformed styles fail when they are set
/// rather than on every feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression(Value);

impl Expression {
    /// # Errors
    ///
    /// When an array in an operator position names an operator that does not exist.
    pub fn compile(value: &Value) -> Result<Self, Error> {
        validate(value)?;
        Ok(Self(value.clone()))
    }

    pub fn evaluate(&self, context: &Context<'_>) -> Result<Value, Error> {
        evaluate(&self.0, context)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Whether the expression reads anything from the feature. Those which don't can be
/// evaluated once per zoom level.
pub fn is_feature_constant(value: &Value) -> bool {
    let Value::Array(values) = value else {
        return true;
    };
    match values.split_first() {
        Some((Value::String(operator), arguments)) => {
            !matches!(
                operator.as_str(),
                "get" | "has" | "!has" | "id" | "properties" | "geometry-type" | "accumulated"
            ) && (operator == "literal" || arguments.iter().all(is_feature_constant))
        }
        _ => true,
    }
}

/// Boolean expression deciding whether a feature belongs to a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter(Expression);

impl Filter {
    pub fn compile(value: &Value) -> Result<Self, Error> {
        Ok(Self(Expression::compile(value)?))
    }

    /// Evaluation failures count as a mismatch.
    pub fn matches(&self, context: &Context<'_>) -> bool {
        match self.0.evaluate(context) {
            Ok(Value::Bool(result)) => result,
            Ok(_) => false,
            Err(error) => {
                log::debug!("Filter {} failed: {error}", self.0.value());
                false
            }
        }
    }
}

fn validate(value: &Value) -> Result<(), Error> {
    let Value::Array(values) = value else {
        return Ok(());
    };
    let Some((Value::String(operator), arguments)) = values.split_first() else {
        // Plain array of values, e.g. match labels.
        return Ok(());
    };

    if !OPERATORS.contains(&operator.as_str()) {
        return Err(Error::UnknownOperator(operator.clone()));
    }

    match operator.as_str() {
        "literal" => Ok(()),
        "match" => {
            let (input, arms) = first_and_rest(arguments)?;
            validate(input)?;
            // Labels are literal values, only outputs and fallback are expressions.
            for arm in arms.chunks(2) {
                validate(arm.last().unwrap_or(&Value::Null))?;
            }
            Ok(())
        }
        _ => arguments.iter().try_for_each(validate),
    }
}

/// Evaluate a style expression.
/// <https://maplibre.org/maplibre-style-spec/expressions/>
pub fn evaluate(value: &Value, context: &Context<'_>) -> Result<Value, Error> {
    match value {
        Value::Array(values) => {
            let Some((Value::String(operator), arguments)) = values.split_first() else {
                return Err(Error::InvalidExpression(value.clone()));
            };

            match operator.as_str() {
                "zoom" => number(context.zoom),
                "literal" => single_value(arguments),
                "!" => match evaluate(&single_value(arguments)?, context)? {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    _ => Err(Error::InvalidExpression(value.clone())),
                },
                "get" => {
                    let key = single_string(arguments)?;
                    Ok(property(key, context))
                }
                "has" => Ok(Value::Bool(has(single_string(arguments)?, context))),
                "!has" => Ok(Value::Bool(!has(single_string(arguments)?, context))),
                "id" => Ok(context.id.cloned().unwrap_or(Value::Null)),
                "properties" => Ok(Value::Object(context.properties.clone())),
                "geometry-type" => Ok(geometry_type(context)),
                "accumulated" => Ok(context.accumulated.cloned().unwrap_or(Value::Null)),
                "image" => {
                    let name = evaluate(&single_value(arguments)?, context)?;
                    let name = to_string(&name);
                    let available = context
                        .available_images
                        .is_none_or(|images| images.contains(&name));
                    Ok(if available { Value::String(name) } else { Value::Null })
                }
                "match" => {
                    let (input, arms) = first_and_rest(arguments)?;
                    let evaluated_input = evaluate(input, context)?;
                    for arm in arms.chunks(2) {
                        match arm {
                            [label, output] => {
                                let matched = match label {
                                    Value::Array(labels) => labels
                                        .iter()
                                        .any(|label| values_equal(label, &evaluated_input)),
                                    label => values_equal(label, &evaluated_input),
                                };
                                if matched {
                                    return evaluate(output, context);
                                }
                            }
                            [fallback] => return evaluate(fallback, context),
                            _ => return Err(Error::InvalidExpression(value.clone())),
                        }
                    }
                    Err(Error::NoFallback(value.clone()))
                }
                "case" => {
                    for arm in arguments.chunks(2) {
                        match arm {
                            [condition, output] => {
                                if evaluate(condition, context)? == Value::Bool(true) {
                                    return evaluate(output, context);
                                }
                            }
                            [fallback] => return evaluate(fallback, context),
                            _ => return Err(Error::InvalidExpression(value.clone())),
                        }
                    }
                    Err(Error::NoFallback(value.clone()))
                }
                "coalesce" => {
                    for argument in arguments {
                        match evaluate(argument, context)? {
                            Value::Null => continue,
                            non_null => return Ok(non_null),
                        }
                    }
                    Ok(Value::Null)
                }
                "in" => Ok(Value::Bool(contains(value, arguments, context)?)),
                "!in" => Ok(Value::Bool(!contains(value, arguments, context)?)),
                "==" => {
                    let (left, right) = comparison_operands(arguments, context)?;
                    Ok(Value::Bool(values_equal(&left, &right)))
                }
                "!=" => {
                    let (left, right) = comparison_operands(arguments, context)?;
                    Ok(Value::Bool(!values_equal(&left, &right)))
                }
                "<" | "<=" | ">" | ">=" => {
                    let (left, right) = comparison_operands(arguments, context)?;
                    let ordering = compare(&left, &right);
                    Ok(Value::Bool(match (operator.as_str(), ordering) {
                        (_, None) => false,
                        ("<", Some(ordering)) => ordering.is_lt(),
                        ("<=", Some(ordering)) => ordering.is_le(),
                        (">", Some(ordering)) => ordering.is_gt(),
                        (_, Some(ordering)) => ordering.is_ge(),
                    }))
                }
                "any" => Ok(arguments
                    .iter()
                    .try_fold(false, |acc, value| {
                        Ok::<_, Error>(acc || evaluate(value, context)? == Value::Bool(true))
                    })?
                    .into()),
                "all" => Ok(arguments
                    .iter()
                    .try_fold(true, |acc, value| {
                        Ok::<_, Error>(acc && evaluate(value, context)? == Value::Bool(true))
                    })?
                    .into()),
                "none" => Ok(arguments
                    .iter()
                    .try_fold(true, |acc, value| {
                        Ok::<_, Error>(acc && evaluate(value, context)? != Value::Bool(true))
                    })?
                    .into()),
                "interpolate" => interpolate(value, arguments, context),
                "step" => {
                    let (input, rest) = first_and_rest(arguments)?;
                    let input = float(&evaluate(input, context)?)?;
                    let (first_output, stops) = first_and_rest(rest)?;
                    let mut output = first_output;
                    for stop in stops.chunks(2) {
                        let [threshold, stop_output] = stop else {
                            return Err(Error::InvalidExpression(value.clone()));
                        };
                        if float(threshold)? <= input {
                            output = stop_output;
                        } else {
                            break;
                        }
                    }
                    evaluate(output, context)
                }
                "format" => {
                    let mut result = String::new();
                    for argument in arguments.chunks(2) {
                        let input = evaluate(&argument[0], context)?;
                        result.push_str(&to_string(&input));
                    }
                    Ok(Value::String(result))
                }
                "concat" => {
                    let mut result = String::new();
                    for argument in arguments {
                        result.push_str(&to_string(&evaluate(argument, context)?));
                    }
                    Ok(Value::String(result))
                }
                "to-string" => Ok(Value::String(to_string(&evaluate(
                    &single_value(arguments)?,
                    context,
                )?))),
                "to-number" => {
                    for argument in arguments {
                        match evaluate(argument, context)? {
                            Value::Number(n) => return Ok(Value::Number(n)),
                            Value::String(s) => {
                                if let Ok(parsed) = s.trim().parse::<f64>() {
                                    return number(parsed);
                                }
                            }
                            Value::Bool(b) => return Ok(Value::from(u8::from(b))),
                            _ => {}
                        }
                    }
                    Err(Error::ExpectedNumber(value.clone()))
                }
                "to-boolean" => Ok(Value::Bool(
                    match evaluate(&single_value(arguments)?, context)? {
                        Value::Null => false,
                        Value::Bool(b) => b,
                        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0. && !n.is_nan()),
                        Value::String(s) => !s.is_empty(),
                        _ => true,
                    },
                )),
                "downcase" => Ok(Value::String(
                    to_string(&evaluate(&single_value(arguments)?, context)?).to_lowercase(),
                )),
                "upcase" => Ok(Value::String(
                    to_string(&evaluate(&single_value(arguments)?, context)?).to_uppercase(),
                )),
                "+" | "*" | "min" | "max" => {
                    let mut operands = arguments.iter();
                    let first = operands
                        .next()
                        .ok_or_else(|| Error::InvalidExpression(value.clone()))?;
                    let mut acc = float(&evaluate(first, context)?)?;
                    for operand in operands {
                        let operand = float(&evaluate(operand, context)?)?;
                        acc = match operator.as_str() {
                            "+" => acc + operand,
                            "*" => acc * operand,
                            "min" => acc.min(operand),
                            _ => acc.max(operand),
                        };
                    }
                    number(acc)
                }
                "-" => match arguments {
                    [single] => number(-float(&evaluate(single, context)?)?),
                    [left, right] => number(
                        float(&evaluate(left, context)?)? - float(&evaluate(right, context)?)?,
                    ),
                    _ => Err(Error::InvalidExpression(value.clone())),
                },
                "/" | "%" | "^" => {
                    let (left, right) = two_elements(arguments)?;
                    let left = float(&evaluate(left, context)?)?;
                    let right = float(&evaluate(right, context)?)?;
                    number(match operator.as_str() {
                        "/" => left / right,
                        "%" => left % right,
                        _ => left.powf(right),
                    })
                }
                _ => Err(Error::UnknownOperator(operator.clone())),
            }
        }
        primitive => Ok(primitive.clone()),
    }
}

fn property(key: &str, context: &Context<'_>) -> Value {
    match key {
        "$type" => geometry_type(context),
        "$id" => context.id.cloned().unwrap_or(Value::Null),
        key => context.properties.get(key).cloned().unwrap_or(Value::Null),
    }
}

fn has(key: &str, context: &Context<'_>) -> bool {
    match key {
        "$type" => context.geometry_type.is_some(),
        "$id" => context.id.is_some_and(|id| !id.is_null()),
        key => context.properties.contains_key(key),
    }
}

fn geometry_type(context: &Context<'_>) -> Value {
    context
        .geometry_type
        .map_or(Value::Null, |kind| Value::String(kind.name().to_owned()))
}

/// Both the legacy `["in", key, v1, v2, ...]` and the expression
/// `["in", needle, haystack]` forms.
fn contains(expression: &Value, arguments: &[Value], context: &Context<'_>) -> Result<bool, Error> {
    if let [needle, haystack @ Value::Array(_)] = arguments {
        if is_expression(haystack) {
            let needle = evaluate(needle, context)?;
            return match evaluate(haystack, context)? {
                Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, &needle))),
                Value::String(haystack) => Ok(haystack.contains(to_string(&needle).as_str())),
                _ => Err(Error::InvalidExpression(expression.clone())),
            };
        }
    }

    let (key, list) = first_and_rest(arguments)?;
    let value = property_or_expression(key, context)?;
    for item in list {
        if values_equal(&value, &evaluate(item, context)?) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Left operand is a property key (legacy filter) or an expression, right one is a
/// literal or an expression.
fn comparison_operands(arguments: &[Value], context: &Context<'_>) -> Result<(Value, Value), Error> {
    let (left, right) = two_elements(arguments)?;
    let left = if is_expression(left) {
        evaluate(left, context)?
    } else {
        property_or_expression(left, context)?
    };
    let right = evaluate(right, context)?;
    Ok((left, right))
}

fn is_expression(value: &Value) -> bool {
    matches!(
        value.as_array().and_then(|values| values.first()),
        Some(Value::String(operator)) if OPERATORS.contains(&operator.as_str())
    )
}

fn interpolate(expression: &Value, arguments: &[Value], context: &Context<'_>) -> Result<Value, Error> {
    let (interpolation_type, args) = first_and_rest(arguments)?;
    let base = match interpolation_type.as_array().map(Vec::as_slice) {
        Some([Value::String(kind), base]) if kind == "exponential" => float(base)?,
        _ => 1.,
    };
    let (input, stops) = first_and_rest(args)?;
    let input = evaluate(input, context)?;

    // Stops are pairs of [input, output].
    let stops = stops
        .chunks(2)
        .map(|chunk| match chunk {
            [stop_input, stop_output] => Ok((stop_input.clone(), stop_output.clone())),
            _ => Err(Error::InvalidExpression(expression.clone())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return Err(Error::InterpolateStopNotFound(input, expression.clone()));
    };

    if lte(&input, &first.0) {
        return evaluate(&first.1, context);
    }
    if lte(&last.0, &input) {
        return evaluate(&last.1, context);
    }

    // Find the two stops surrounding the input value.
    let stop_pair = stops.windows(2).find(|pair| {
        let left_stop = &pair[0].0;
        let right_stop = &pair[1].0;
        lte(left_stop, &input) && lte(&input, right_stop)
    });

    if let Some(stop_pair) = stop_pair {
        let input_delta = numeric_difference(&stop_pair[1].0, &stop_pair[0].0)?;
        let progress = numeric_difference(&input, &stop_pair[0].0)?;

        // Position of the input value between the two stops (0.0 to 1.0).
        let input_position = if input_delta == 0. {
            0.
        } else if base == 1. {
            progress / input_delta
        } else {
            (base.powf(progress) - 1.) / (base.powf(input_delta) - 1.)
        };

        let left = evaluate(&stop_pair[0].1, context)?;
        let right = evaluate(&stop_pair[1].1, context)?;
        lerp(&left, &right, input_position)
    } else {
        Err(Error::InterpolateStopNotFound(input, expression.clone()))
    }
}

/// Numbers compare by value, regardless of their JSON representation.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Stringify like the style runtime does, integers without a fraction.
pub fn to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0. && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn number(value: f64) -> Result<Value, Error> {
    Ok(Value::Number(
        Number::from_f64(value).ok_or(Error::CouldNotSerializeFloat)?,
    ))
}

/// Expect a float Value.
fn float(v: &Value) -> Result<f64, Error> {
    if let Value::Number(n) = v {
        n.as_f64().ok_or(Error::ExpectedFloat(n.clone()))
    } else {
        Err(Error::ExpectedNumber(v.clone()))
    }
}

/// Linear interpolation between two Values (Numbers or Strings representing colors).
fn lerp(a: &Value, b: &Value, t: f64) -> Result<Value, Error> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => {
            let a: AlphaColor<Srgb> = a.parse().map_err(Error::ColorParse)?;
            let b: AlphaColor<Srgb> = b.parse().map_err(Error::ColorParse)?;
            let color = a.lerp(b, t as f32, HueDirection::default());
            Ok(Value::String(color.to_rgba8().to_string()))
        }
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().ok_or(Error::ExpectedFloat(a.clone()))?;
            let b = b.as_f64().ok_or(Error::ExpectedFloat(b.clone()))?;
            number(a + (b - a) * t)
        }
        _ => Err(Error::CannotInterpolate(a.clone(), b.clone())),
    }
}

fn numeric_difference(left: &Value, right: &Value) -> Result<f64, Error> {
    Ok(float(left)? - float(right)?)
}

/// Less than or equal comparison for Numbers and Strings.
fn lte(left: &Value, right: &Value) -> bool {
    compare(left, right).is_some_and(std::cmp::Ordering::is_le)
}

/// Evaluate token as either a property key (String) or an expression (Array).
fn property_or_expression(value: &Value, context: &Context<'_>) -> Result<Value, Error> {
    match value {
        Value::String(key) => Ok(property(key, context)),
        Value::Array(_) => evaluate(value, context),
        _ => Err(Error::ExpectedKeyOrExpression(value.clone())),
    }
}

/// Expect a string as the first element, e.g. a property key.
fn single_string(values: &[Value]) -> Result<&str, Error> {
    if let [Value::String(s), ..] = values {
        Ok(s)
    } else {
        Err(Error::SingleStringExpected(values.to_vec()))
    }
}

/// Expect exactly one element.
fn single_value(values: &[Value]) -> Result<Value, Error> {
    match values {
        [value] => Ok(value.clone()),
        _ => Err(Error::SingleValueExpected(values.to_vec())),
    }
}

/// Expect exactly two elements.
fn two_elements(slice: &[Value]) -> Result<(&Value, &Value), Error> {
    if let [a, b] = slice {
        Ok((a, b))
    } else {
        Err(Error::TwoElementsExpected(slice.to_vec()))
    }
}

/// Expect two or more elements.
fn first_and_rest(slice: &[Value]) -> Result<(&Value, &[Value]), Error> {
    slice
        .split_first()
        .ok_or(Error::AtLeastTwoElementsExpected(slice.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn properties(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => panic!("properties must be an object"),
        }
    }

    fn eval(expression: Value, properties: &Properties) -> Value {
        evaluate(&expression, &Context::new(1., properties)).unwrap()
    }

    #[test]
    fn test_lerp() {
        assert_eq!(5.0, lerp(&json!(0), &json!(10.0), 0.5).unwrap());

        assert_eq!(
            "rgb(128, 128, 128)",
            lerp(&json!("rgb(0, 0, 0)"), &json!("rgb(255, 255, 255)"), 0.5).unwrap()
        );
    }

    #[test]
    fn test_eq_filter_matching() {
        let park = properties(json!({"type": "park"}));
        let forest = properties(json!({"type": "forest"}));

        let filter = Filter::compile(&json!(["==", "type", "park"])).unwrap();

        assert!(filter.matches(&Context::new(1., &park)));
        assert!(!filter.matches(&Context::new(1., &forest)));
    }

    #[test]
    fn test_ne_filter_with_missing_property() {
        let empty = Properties::new();
        let filter = Filter::compile(&json!(["!=", "class", "main"])).unwrap();
        assert!(filter.matches(&Context::new(1., &empty)));
    }

    #[test]
    fn test_in_filter() {
        let park = properties(json!({"type": "park"}));
        let road = properties(json!({"type": "road"}));

        let filter = Filter::compile(&json!(["in", "type", "park", "forest"])).unwrap();

        assert!(filter.matches(&Context::new(1., &park)));
        assert!(!filter.matches(&Context::new(1., &road)));

        let filter = Filter::compile(&json!(["!in", "type", "park", "forest"])).unwrap();
        assert!(filter.matches(&Context::new(1., &road)));
    }

    #[test]
    fn test_in_expression_form() {
        let park = properties(json!({"type": "park"}));
        assert_eq!(
            eval(json!(["in", ["get", "type"], ["literal", ["park", "forest"]]]), &park),
            json!(true)
        );
        assert_eq!(
            eval(json!(["in", "ar", ["get", "type"]]), &park),
            json!(true)
        );
    }

    #[test]
    fn test_expression_form_equality() {
        let main = properties(json!({"class": "main", "lanes": 2}));
        assert_eq!(eval(json!(["==", ["get", "class"], "main"]), &main), json!(true));
        assert_eq!(eval(json!(["==", ["get", "lanes"], 2.0]), &main), json!(true));
    }

    #[test]
    fn test_comparison_operators() {
        let road = properties(json!({"lanes": 3}));
        assert_eq!(eval(json!([">", "lanes", 2]), &road), json!(true));
        assert_eq!(eval(json!(["<=", ["get", "lanes"], 2]), &road), json!(false));
        assert_eq!(eval(json!([">=", "missing", 2]), &road), json!(false));
    }

    #[test]
    fn test_geometry_type_and_id() {
        let empty = Properties::new();
        let id = json!(7);
        let context = Context::new(1., &empty)
            .with_id(Some(&id))
            .with_geometry_type(GeomType::Polygon);

        assert_eq!(
            evaluate(&json!(["==", "$type", "Polygon"]), &context).unwrap(),
            json!(true)
        );
        assert_eq!(evaluate(&json!(["id"]), &context).unwrap(), json!(7));
        assert_eq!(
            evaluate(&json!(["geometry-type"]), &context).unwrap(),
            json!("Polygon")
        );
    }

    #[test]
    fn test_compile_rejects_unknown_operators() {
        assert!(matches!(
            Expression::compile(&json!(["all", ["bogus", 1]])),
            Err(Error::UnknownOperator(operator)) if operator == "bogus"
        ));
        assert!(Expression::compile(&json!(["match", ["get", "a"], ["x", "y"], 1, 0])).is_ok());
    }

    #[test]
    fn test_literal_operator() {
        assert_eq!(
            eval(json!(["literal", [1, 2, 3]]), &Properties::new()),
            json!([1, 2, 3])
        );
    }

    #[test]
    fn test_get_operator() {
        let properties = properties(json!({"name": "Polska"}));

        assert_eq!(eval(json!(["get", "name"]), &properties), json!("Polska"));
        assert_eq!(eval(json!(["get", "population"]), &properties), Value::Null);
    }

    #[test]
    fn test_has_operator() {
        let properties = properties(json!({"name": "Polska"}));
        assert_eq!(eval(json!(["has", "name"]), &properties), json!(true));
    }

    #[test]
    fn test_not_has_operator() {
        assert_eq!(eval(json!(["!has", "name"]), &Properties::new()), json!(true));
    }

    #[test]
    fn test_match_operator() {
        assert_eq!(
            eval(
                json!([
                    "match",
                    42,
                    1,
                    "Not this one",
                    [2, 42],
                    "Got it!",
                    "Default"
                ]),
                &Properties::new()
            ),
            json!("Got it!")
        );
    }

    #[test]
    fn test_match_operator_reaching_default() {
        assert_eq!(
            eval(
                json!([
                    "match",
                    42,
                    1,
                    "Not this one",
                    2,
                    "Also not this one",
                    "It's the default!",
                ]),
                &Properties::new()
            ),
            json!("It's the default!")
        );
    }

    #[test]
    fn test_case_operator() {
        let properties = Properties::new();

        assert_eq!(
            eval(
                json!(["case", false, "Not this one", true, "Got it!", "default"]),
                &properties
            ),
            json!("Got it!")
        );

        assert_eq!(
            eval(json!(["case", false, "first", false, "second", "default"]), &properties),
            json!("default")
        );

        assert!(matches!(
            evaluate(&json!(["case", false, "first"]), &Context::new(1., &properties)),
            Err(Error::NoFallback(_))
        ));
    }

    #[test]
    fn test_coalesce_operator() {
        let properties = Properties::new();

        assert_eq!(
            eval(json!(["coalesce", Value::Null, "Got it!"]), &properties),
            json!("Got it!")
        );
        assert_eq!(
            eval(json!(["coalesce", Value::Null, Value::Null]), &properties),
            Value::Null
        );
    }

    #[test]
    fn test_any_all_none_operators() {
        let properties = Properties::new();

        assert_eq!(eval(json!(["any", true, false]), &properties), json!(true));
        assert_eq!(eval(json!(["any", false, false]), &properties), json!(false));
        assert_eq!(eval(json!(["all", true, false]), &properties), json!(false));
        assert_eq!(eval(json!(["all", true, true]), &properties), json!(true));
        assert_eq!(eval(json!(["none", false, false]), &properties), json!(true));
    }

    #[test]
    fn test_interpolate_operator() {
        let properties = Properties::new();

        assert_eq!(
            eval(json!(["interpolate", ["linear"], 5, 0, 0, 10, 10]), &properties),
            json!(5.0)
        );
        assert_eq!(
            eval(json!(["interpolate", ["linear"], ["zoom"], 5, 1, 10, 2]), &properties),
            json!(1)
        );
    }

    #[test]
    fn test_step_operator() {
        let properties = properties(json!({"point_count": 120}));
        let expression = json!(["step", ["get", "point_count"], "small", 100, "medium", 750, "large"]);
        assert_eq!(eval(expression, &properties), json!("medium"));
    }

    #[test]
    fn test_arithmetic_operators() {
        let properties = properties(json!({"a": 6, "b": 4}));
        assert_eq!(eval(json!(["+", ["get", "a"], ["get", "b"], 1]), &properties), json!(11.0));
        assert_eq!(eval(json!(["-", ["get", "a"], ["get", "b"]]), &properties), json!(2.0));
        assert_eq!(eval(json!(["/", ["get", "a"], ["get", "b"]]), &properties), json!(1.5));
        assert_eq!(eval(json!(["max", 1, ["get", "a"]]), &properties), json!(6.0));
    }

    #[test]
    fn test_accumulated_operator() {
        let properties = properties(json!({"sum": 3}));
        let accumulated = json!(2);
        let context = Context::new(0., &properties).with_accumulated(&accumulated);
        assert_eq!(
            evaluate(&json!(["+", ["accumulated"], ["get", "sum"]]), &context).unwrap(),
            json!(5.0)
        );
    }

    #[test]
    fn test_negation_operator() {
        assert_eq!(eval(json!(["!", false]), &Properties::new()), json!(true));
    }

    #[test]
    fn test_format_and_concat_operators() {
        let properties = properties(json!({"ref": 8}));

        assert_eq!(
            eval(json!(["format", "Hello", {}, "World", {}]), &properties),
            json!("HelloWorld")
        );
        assert_eq!(
            eval(json!(["concat", "A", ["get", "ref"]]), &properties),
            json!("A8")
        );
        assert_eq!(eval(json!(["to-string", ["+", 1, 1]]), &properties), json!("2"));
    }

    #[test]
    fn test_image_operator() {
        let available = ["bus".to_owned()];
        let properties = Properties::new();
        let context = Context::new(0., &properties).with_available_images(&available);
        assert_eq!(evaluate(&json!(["image", "bus"]), &context).unwrap(), json!("bus"));
        assert_eq!(evaluate(&json!(["image", "tram"]), &context).unwrap(), Value::Null);

        // Nothing known about images, everything goes.
        assert_eq!(eval(json!(["image", "tram"]), &properties), json!("tram"));
    }

    #[test]
    fn test_feature_constant_expressions() {
        assert!(is_feature_constant(&json!(["interpolate", ["linear"], ["zoom"], 0, 1, 10, 4])));
        assert!(is_feature_constant(&json!(["literal", ["get", "x"]])));
        assert!(is_feature_constant(&json!("{name}")));
        assert!(!is_feature_constant(&json!(["concat", "A", ["get", "ref"]])));
        assert!(!is_feature_constant(&json!(["match", ["geometry-type"], "Point", 1, 2])));
    }
}
