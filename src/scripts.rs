//! Driver scripts executed by the conversion backends.
//!
//! Each backend runs a tiny Python program inside its toolchain's interpreter:
//! `freecadcmd` for FreeCAD, the image's `python` for CadQuery. The scripts
//! are written verbatim into the workspace before each attempt and receive
//! `<input> <output>` as arguments; meshing fidelity arrives through the
//! environment.
//!
//! Both scripts exit with code 1 on bad arguments and 2 when the toolkit
//! raises, printing the traceback to stderr so it lands in the captured
//! diagnostics.
//!
//! Callers can replace either body via
//! [`crate::config::ConversionConfigBuilder::script_override`]; the constants
//! here are used only when no override is provided.

/// FreeCAD driver: `Part.Shape.read` + `MeshPart.meshFromShape`.
///
/// Reads `LINEAR_DEFLECTION` and `ANGULAR_DEFLECTION`.
pub const FREECAD_SCRIPT: &str = r#"import os
import sys
import traceback


def main():
    if len(sys.argv) < 3:
        print("Missing arguments: input_path output_path", file=sys.stderr)
        sys.exit(1)

    input_path = sys.argv[-2]
    output_path = sys.argv[-1]
    linear_deflection = float(os.environ.get("LINEAR_DEFLECTION", "0.1"))
    angular_deflection = float(os.environ.get("ANGULAR_DEFLECTION", "0.3490658504"))

    try:
        import Mesh  # noqa: F401
        import MeshPart
        import Part

        shape = Part.Shape()
        shape.read(input_path)

        mesh = MeshPart.meshFromShape(
            Shape=shape,
            LinearDeflection=linear_deflection,
            AngularDeflection=angular_deflection,
            Relative=False,
        )
        mesh.write(output_path)
        print(f"Converted {input_path} to {output_path}")
    except Exception:
        traceback.print_exc()
        sys.exit(2)


if __name__ == "__main__":
    main()
"#;

/// CadQuery driver: `importers.importStep` + STL export.
///
/// Reads `TOLERANCE` and `ANGULAR_TOLERANCE`.
pub const CADQUERY_SCRIPT: &str = r#"import os
import sys
import traceback


def main():
    if len(sys.argv) < 3:
        print("Missing arguments: input_path output_path", file=sys.stderr)
        sys.exit(1)

    input_path = sys.argv[1]
    output_path = sys.argv[2]
    tolerance = float(os.environ.get("TOLERANCE", "0.1"))
    angular_tolerance = float(os.environ.get("ANGULAR_TOLERANCE", "0.3490658504"))

    try:
        from cadquery import exporters, importers

        ext = os.path.splitext(input_path)[1].lower()
        if ext in (".step", ".stp"):
            model = importers.importStep(input_path)
        elif ext in (".iges", ".igs"):
            import OCP.IGESControl as igs
            from cadquery import Shape, Workplane

            reader = igs.IGESControl_Reader()
            if reader.ReadFile(input_path) != 1:
                raise ValueError(f"Could not read IGES file {input_path}")
            reader.TransferRoots()
            model = Workplane("XY").add(Shape.cast(reader.OneShape()))
        else:
            raise ValueError(f"Unsupported CAD extension {ext}")

        exporters.export(
            model,
            output_path,
            exporters.ExportTypes.STL,
            tolerance=tolerance,
            angularTolerance=angular_tolerance,
        )
        print(f"Converted {input_path} to {output_path}")
    except Exception:
        traceback.print_exc()
        sys.exit(2)


if __name__ == "__main__":
    main()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_read_their_tolerance_variables() {
        assert!(FREECAD_SCRIPT.contains("LINEAR_DEFLECTION"));
        assert!(FREECAD_SCRIPT.contains("ANGULAR_DEFLECTION"));
        assert!(CADQUERY_SCRIPT.contains("\"TOLERANCE\""));
        assert!(CADQUERY_SCRIPT.contains("ANGULAR_TOLERANCE"));
    }

    #[test]
    fn scripts_default_to_twenty_degrees() {
        for script in [FREECAD_SCRIPT, CADQUERY_SCRIPT] {
            assert!(script.contains("0.3490658504"));
            assert!(script.contains("sys.exit(2)"));
        }
    }
}
